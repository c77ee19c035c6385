//! Catch-all for input that already matches the canonical doc shape
//! (`title`/`steps[]`), tried last in the registry.

use common::error::CoreError;
use serde_json::Value;

use super::{
    dedup_preserve_case, fallback_uid, harmonise_folder_path, harmonise_priority, harmonise_steps, NormalisedDoc,
    NormalisedStep, NormaliseWarning, Preprocessor,
};

pub fn preprocessor() -> Preprocessor {
    Preprocessor {
        name: "generic",
        predicate,
        transform,
    }
}

fn predicate(raw: &Value) -> bool {
    raw.get("title").and_then(Value::as_str).is_some()
}

fn transform(raw: &Value, warnings: &mut Vec<NormaliseWarning>) -> Result<NormalisedDoc, CoreError> {
    let title = raw
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidInput("record missing 'title'".to_string()))?
        .to_string();

    let external_key = raw.get("external_key").and_then(Value::as_str).map(str::to_string);
    let uid = external_key.clone().unwrap_or_else(|| fallback_uid(&title, "generic"));
    if external_key.is_none() {
        warnings.push(NormaliseWarning {
            field: "external_key".to_string(),
            message: "no external_key present; derived uid from title+source".to_string(),
        });
    }

    let priority_str = raw.get("priority").and_then(Value::as_str);
    let priority = harmonise_priority(priority_str, warnings);

    let string_array = |key: &str| -> Vec<String> {
        raw.get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };

    let folder_structure: Vec<String> = string_array("folder_path");
    let folder_path = harmonise_folder_path(raw.get("folder").and_then(Value::as_str), Some(&folder_structure));

    let steps = raw
        .get("steps")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, step)| NormalisedStep {
                    index: step.get("index").and_then(Value::as_u64).map(|v| v as u32).unwrap_or(i as u32),
                    action: step.get("action").and_then(Value::as_str).unwrap_or_default().to_string(),
                    data: step.get("data").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string),
                    expected: match step.get("expected") {
                        Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
                        _ => Vec::new(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalisedDoc {
        uid,
        external_key,
        title,
        description: raw.get("description").and_then(Value::as_str).map(str::to_string),
        priority,
        test_type: raw.get("test_type").and_then(Value::as_str).map(str::to_string),
        platforms: string_array("platforms"),
        tags: dedup_preserve_case(string_array("tags")),
        folder_path,
        related_keys: string_array("related_keys"),
        source: raw.get("source").and_then(Value::as_str).unwrap_or_default().to_string(),
        steps: harmonise_steps(steps, warnings),
    })
}
