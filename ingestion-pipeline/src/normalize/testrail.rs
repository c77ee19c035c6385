//! TestRail case-export shape: `case_id`, `custom_steps_separated[]`, `refs`.

use common::error::CoreError;
use common::storage::types::test_doc::Priority;
use serde_json::Value;

use super::{
    dedup_preserve_case, fallback_uid, harmonise_folder_path, harmonise_steps, NormalisedDoc, NormalisedStep,
    NormaliseWarning, Preprocessor,
};

pub fn preprocessor() -> Preprocessor {
    Preprocessor {
        name: "testrail",
        predicate,
        transform,
    }
}

fn predicate(raw: &Value) -> bool {
    raw.get("case_id").is_some() && raw.get("custom_steps_separated").is_some()
}

fn transform(raw: &Value, warnings: &mut Vec<NormaliseWarning>) -> Result<NormalisedDoc, CoreError> {
    let title = raw
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidInput("testrail record missing 'title'".to_string()))?
        .to_string();

    let case_id = raw.get("case_id").and_then(Value::as_i64).map(|id| id.to_string());
    let uid = case_id.clone().unwrap_or_else(|| fallback_uid(&title, "testrail"));
    if case_id.is_none() {
        warnings.push(NormaliseWarning {
            field: "case_id".to_string(),
            message: "missing case_id; derived uid from title+source".to_string(),
        });
    }

    let priority = match raw.get("priority").and_then(Value::as_str) {
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
    };

    let tags = raw
        .get("labels")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let related_keys = raw
        .get("refs")
        .and_then(Value::as_str)
        .map(|refs| refs.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let folder_path = harmonise_folder_path(raw.get("section").and_then(Value::as_str), None);

    let steps = raw
        .get("custom_steps_separated")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, step)| NormalisedStep {
                    index: step.get("index").and_then(Value::as_u64).map(|v| v as u32).unwrap_or(i as u32),
                    action: step.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
                    data: step.get("additional_info").and_then(Value::as_str).map(str::to_string),
                    expected: step
                        .get("expected")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(|s| vec![s.to_string()])
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalisedDoc {
        uid,
        external_key: case_id,
        title,
        description: raw.get("description").and_then(Value::as_str).map(str::to_string),
        priority,
        test_type: raw.get("type").and_then(Value::as_str).map(str::to_string),
        platforms: Vec::new(),
        tags: dedup_preserve_case(tags),
        folder_path,
        related_keys,
        source: "testrail".to_string(),
        steps: harmonise_steps(steps, warnings),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_testrail_shape() {
        let raw = json!({"case_id": 42, "custom_steps_separated": []});
        assert!(predicate(&raw));
    }

    #[test]
    fn maps_refs_to_related_keys() {
        let raw = json!({
            "case_id": 42,
            "title": "Login works",
            "refs": "JIRA-1, JIRA-2",
            "custom_steps_separated": [{"content": "open page", "expected": "page loads"}],
        });
        let mut warnings = Vec::new();
        let doc = transform(&raw, &mut warnings).expect("transform");
        assert_eq!(doc.related_keys, vec!["JIRA-1".to_string(), "JIRA-2".to_string()]);
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].expected, vec!["page loads".to_string()]);
    }

    #[test]
    fn missing_case_id_falls_back_and_warns() {
        let raw = json!({"title": "Nameless case", "custom_steps_separated": []});
        let mut warnings = Vec::new();
        let doc = transform(&raw, &mut warnings).expect("transform");
        assert!(doc.external_key.is_none());
        assert_eq!(warnings.len(), 1);
    }
}
