use std::num::NonZeroU32;

use common::error::CoreError;
use common::utils::config::AppConfig;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Per-tool QPS caps enforced at the tool boundary (§5): `search_tests` and
/// `find_similar_tests` share the search cap, `ingest_tests` has its own.
/// `get_test_by_key` and `check_health` are left uncapped, matching that
/// neither is named in the cap table.
pub struct ToolLimiters {
    search: DirectLimiter,
    ingest: DirectLimiter,
    clock: DefaultClock,
}

impl ToolLimiters {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            search: RateLimiter::direct(Quota::per_minute(non_zero(config.search_qps))),
            ingest: RateLimiter::direct(Quota::per_minute(non_zero(config.ingest_qps))),
            clock: DefaultClock::default(),
        }
    }

    pub fn check_search(&self) -> Result<(), CoreError> {
        Self::check(&self.search, &self.clock)
    }

    pub fn check_ingest(&self) -> Result<(), CoreError> {
        Self::check(&self.ingest, &self.clock)
    }

    fn check(limiter: &DirectLimiter, clock: &DefaultClock) -> Result<(), CoreError> {
        limiter.check().map_err(|not_until| {
            let retry_after_secs = not_until.wait_time_from(clock.now()).as_secs().max(1);
            CoreError::RateLimited { retry_after_secs }
        })
    }
}

fn non_zero(qps: u32) -> NonZeroU32 {
    NonZeroU32::new(qps).unwrap_or(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(search_qps: u32, ingest_qps: u32) -> AppConfig {
        use common::utils::config::EmbedProviderKind;
        AppConfig {
            embed_provider: EmbedProviderKind::Hashed,
            embed_model: "test".to_string(),
            embed_dim: 4,
            openai_api_key: None,
            store_dsn: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "ns".to_string(),
            surrealdb_database: "db".to_string(),
            w_doc: 0.7,
            w_step: 0.3,
            overfetch: 3,
            b_ingest: 500,
            p_ingest: 3,
            b_embed: 25,
            p_embed: 4,
            checkpoint_path: "./checkpoint".to_string(),
            search_timeout_secs: 10,
            ingest_chunk_timeout_secs: 60,
            shutdown_grace_secs: 30,
            http_port: 8080,
            search_qps,
            ingest_qps,
        }
    }

    #[test]
    fn exceeding_the_cap_yields_rate_limited_with_retry_hint() {
        let limiters = ToolLimiters::from_app_config(&test_config(1, 1));
        limiters.check_search().expect("first call within budget");
        let result = limiters.check_search();
        assert!(matches!(
            result,
            Err(CoreError::RateLimited { retry_after_secs }) if retry_after_secs >= 1
        ));
    }

    #[test]
    fn zero_qps_config_does_not_panic() {
        let limiters = ToolLimiters::from_app_config(&test_config(0, 0));
        let _ = limiters.check_search();
    }
}
