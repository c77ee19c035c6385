use crate::error::CoreError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect to the configured store and select the working namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the schema and runtime indexes the store is assumed to provide:
    /// filterable payload fields and the two HNSW-indexed vector tables.
    /// Idempotent. Uniqueness of the canonical uid (I2) is already enforced
    /// by the SurrealDB record id each row is created under, so no separate
    /// index asserts it.
    pub async fn apply_migrations(&self) -> Result<(), CoreError> {
        self.client
            .query(
                "DEFINE TABLE IF NOT EXISTS test_doc SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_test_doc_external_key ON TABLE test_doc FIELDS external_key;
                 DEFINE TABLE IF NOT EXISTS test_step SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_test_step_parent_index ON TABLE test_step FIELDS parent_uid, index UNIQUE;
                 DEFINE TABLE IF NOT EXISTS ingest_checkpoint SCHEMALESS;",
            )
            .await
            .map_err(CoreError::from)?
            .check()
            .map_err(CoreError::from)?;

        Ok(())
    }

    /// Store an object, requires the struct to implement [`StoredObject`].
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Store an object, replacing any existing record with the same id.
    /// Unlike [`Self::store_item`] this never fails on a pre-existing id,
    /// which is what repeated ingestion of the same `uid` requires.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .update((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
