use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::types::test_doc::TestDoc;
use tracing::instrument;

/// Direct lookup by external key: filter `external_key == k`, return the
/// single matching doc, or a disambiguation error when more than one source
/// record shares the same key.
#[instrument(skip(db))]
pub async fn get_by_key(db: &SurrealDbClient, external_key: &str) -> Result<TestDoc, CoreError> {
    let mut matches = TestDoc::fetch_by_external_key(db, external_key).await?;
    match matches.len() {
        0 => Err(CoreError::NotFound(format!("no test with external_key '{external_key}'"))),
        1 => Ok(matches.remove(0)),
        n => Err(CoreError::Conflict(format!(
            "external_key '{external_key}' is ambiguous: matches {n} tests"
        ))),
    }
}
