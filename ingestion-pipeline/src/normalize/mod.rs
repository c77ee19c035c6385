//! Source-format-specific preprocessors -> canonical `TestDoc`.

pub mod generic;
pub mod testrail;
pub mod xray;

use common::error::CoreError;
use common::storage::types::test_doc::Priority;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct NormaliseWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NormalisedStep {
    pub index: u32,
    pub action: String,
    pub data: Option<String>,
    pub expected: Vec<String>,
}

/// A canonical test doc prior to embedding (uid already resolved, no vector yet).
#[derive(Debug, Clone)]
pub struct NormalisedDoc {
    pub uid: String,
    pub external_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub test_type: Option<String>,
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
    pub folder_path: Vec<String>,
    pub related_keys: Vec<String>,
    pub source: String,
    pub steps: Vec<NormalisedStep>,
}

impl NormalisedDoc {
    /// `title · newline · description` (if non-empty).
    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{}\n{}", self.title, d),
            _ => self.title.clone(),
        }
    }
}

impl NormalisedStep {
    /// `action · newline · data (if non-empty) · newline · expected joined with "; "`.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![self.action.clone()];
        if let Some(d) = &self.data {
            if !d.is_empty() {
                parts.push(d.clone());
            }
        }
        if !self.expected.is_empty() {
            parts.push(self.expected.join("; "));
        }
        parts.join("\n")
    }
}

type Transform = fn(&Value, &mut Vec<NormaliseWarning>) -> Result<NormalisedDoc, CoreError>;

pub struct Preprocessor {
    pub name: &'static str,
    pub predicate: fn(&Value) -> bool,
    pub transform: Transform,
}

/// First-match-wins registry: `testrail`, then `xray`, then the
/// `generic` catch-all for already-normalised input.
fn registry() -> [Preprocessor; 3] {
    [testrail::preprocessor(), xray::preprocessor(), generic::preprocessor()]
}

/// `Normalise(raw) -> TestDoc`.
pub fn normalise(raw: &Value, source: &str) -> Result<(NormalisedDoc, Vec<NormaliseWarning>), CoreError> {
    let mut warnings = Vec::new();
    for preprocessor in registry() {
        if (preprocessor.predicate)(raw) {
            let mut doc = (preprocessor.transform)(raw, &mut warnings)?;
            if doc.source.is_empty() {
                doc.source = source.to_string();
            }
            return Ok((doc, warnings));
        }
    }
    Err(CoreError::InvalidInput(
        "no registered preprocessor matched this record's shape".to_string(),
    ))
}

/// Deterministic hash of `(title, source)`, used when no explicit identifier
/// or source-specific case id is present.
pub fn fallback_uid(title: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\0");
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `folder` (string, `/`-separated) | `folderStructure` (array) -> `folder_path`.
/// Leading/trailing separators are trimmed.
pub fn harmonise_folder_path(folder: Option<&str>, folder_structure: Option<&[String]>) -> Vec<String> {
    if let Some(parts) = folder_structure {
        return parts
            .iter()
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(f) = folder {
        return f
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    Vec::new()
}

/// Missing priority defaults to `Medium`. The canonical `Priority` enum has no
/// slot for an unrecognised value, so one is recorded as `None` with a
/// warning rather than silently coerced.
pub fn harmonise_priority(raw: Option<&str>, warnings: &mut Vec<NormaliseWarning>) -> Option<Priority> {
    match raw {
        None => Some(Priority::Medium),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            other => {
                warnings.push(NormaliseWarning {
                    field: "priority".to_string(),
                    message: format!("unrecognised priority '{other}'"),
                });
                None
            }
        },
    }
}

/// Deduplicate a set of strings while preserving case and first-seen order.
pub fn dedup_preserve_case(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

/// Harmonise steps to `{index, action, data, expected[]}`. A scalar `expected`
/// is wrapped in a one-element array. Duplicate indices: last wins, with a warning.
pub fn harmonise_steps(raw_steps: Vec<NormalisedStep>, warnings: &mut Vec<NormaliseWarning>) -> Vec<NormalisedStep> {
    let mut by_index: std::collections::BTreeMap<u32, NormalisedStep> = std::collections::BTreeMap::new();
    for step in raw_steps {
        if by_index.contains_key(&step.index) {
            warnings.push(NormaliseWarning {
                field: "steps".to_string(),
                message: format!("duplicate step index {}; last wins", step.index),
            });
        }
        by_index.insert(step.index, step);
    }
    by_index.into_values().collect()
}
