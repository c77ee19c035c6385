use common::utils::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tier(s) of the two-tier store to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Docs,
    Steps,
    All,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::All
    }
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "docs" => Ok(Self::Docs),
            "steps" => Ok(Self::Steps),
            "all" => Ok(Self::All),
            other => Err(format!("unknown search scope '{other}'")),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchScope::Docs => "docs",
            SearchScope::Steps => "steps",
            SearchScope::All => "all",
        };
        f.write_str(label)
    }
}

pub const DEFAULT_TOP_K: usize = 20;
pub const MAX_TOP_K: usize = 100;
pub const MAX_QUERY_BYTES: usize = 8 * 1024;
pub const MAX_OVERFETCHED: usize = 1000;
/// `ef` (HNSW search-list size) passed to the store's kNN operator; generous
/// relative to any single request's `k` so recall doesn't degrade under the
/// default overfetch.
pub const KNN_EF: usize = 200;

/// Tunable parameters governing score fusion and fan-out width.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalTuning {
    pub w_doc: f32,
    pub w_step: f32,
    pub overfetch: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self { w_doc: 0.7, w_step: 0.3, overfetch: 3 }
    }
}

impl RetrievalTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self { w_doc: config.w_doc, w_step: config.w_step, overfetch: config.overfetch }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { tuning: RetrievalTuning::default() }
    }
}

impl RetrievalConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self { tuning: RetrievalTuning::from_app_config(config) }
    }
}
