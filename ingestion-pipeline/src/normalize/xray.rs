//! Xray/Jira test-issue shape: `key`, `fields.testScript.steps[]`.

use common::error::CoreError;
use common::storage::types::test_doc::Priority;
use serde_json::Value;

use super::{
    dedup_preserve_case, harmonise_folder_path, harmonise_priority, harmonise_steps, NormalisedDoc, NormalisedStep,
    NormaliseWarning, Preprocessor,
};

pub fn preprocessor() -> Preprocessor {
    Preprocessor {
        name: "xray",
        predicate,
        transform,
    }
}

fn predicate(raw: &Value) -> bool {
    raw.get("key").and_then(Value::as_str).is_some() && raw.get("fields").and_then(|f| f.get("testScript")).is_some()
}

fn transform(raw: &Value, warnings: &mut Vec<NormaliseWarning>) -> Result<NormalisedDoc, CoreError> {
    let key = raw
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidInput("xray record missing 'key'".to_string()))?
        .to_string();

    let fields = raw.get("fields").ok_or_else(|| CoreError::InvalidInput("xray record missing 'fields'".to_string()))?;

    let title = fields
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidInput("xray record missing 'fields.summary'".to_string()))?
        .to_string();

    let priority_name = fields.get("priority").and_then(|p| p.get("name")).and_then(Value::as_str);
    let priority: Option<Priority> = harmonise_priority(priority_name, warnings);

    let tags = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let related_keys = fields
        .get("issuelinks")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|link| link.get("outwardIssue").or_else(|| link.get("inwardIssue")))
                .filter_map(|issue| issue.get("key").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let folder_path = harmonise_folder_path(
        None,
        fields
            .get("testRepositoryPath")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>())
            .as_deref(),
    );

    let steps = fields
        .get("testScript")
        .and_then(|ts| ts.get("steps"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, step)| NormalisedStep {
                    index: step.get("index").and_then(Value::as_u64).map(|v| v as u32).unwrap_or(i as u32),
                    action: step.get("action").and_then(Value::as_str).unwrap_or_default().to_string(),
                    data: step.get("data").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string),
                    expected: step
                        .get("result")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(|s| vec![s.to_string()])
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalisedDoc {
        uid: key.clone(),
        external_key: Some(key),
        title,
        description: fields.get("description").and_then(Value::as_str).map(str::to_string),
        priority,
        test_type: fields.get("testType").and_then(|t| t.get("name")).and_then(Value::as_str).map(str::to_string),
        platforms: Vec::new(),
        tags: dedup_preserve_case(tags),
        folder_path,
        related_keys,
        source: "xray".to_string(),
        steps: harmonise_steps(steps, warnings),
    })
}
