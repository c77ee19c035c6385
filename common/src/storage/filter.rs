use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;

const MAX_STRING_LEN: usize = 256;
const MAX_SET_LEN: usize = 64;

/// User-supplied filter object, deserialized directly off a tool
/// call. `deny_unknown_fields` gives us "reject unknown keys" for free, the way
/// serde-derived request bodies already reject stray fields elsewhere in the
/// workspace.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterInput {
    pub tags: Option<Vec<String>>,
    pub platforms: Option<Vec<String>>,
    pub priority: Option<String>,
    pub test_type: Option<String>,
    pub folder_prefix: Option<Vec<String>>,
    pub related_keys: Option<Vec<String>>,
    pub external_key_pattern: Option<String>,
}

/// A filter compiled into a parameterised `WHERE` fragment plus its bound
/// values. Compiles identically for the doc tier and the step tier, since both
/// tables carry the same filterable fields (the step tier's copies are
/// denormalised from the parent doc at upsert time).
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    /// `None` means "no predicate", i.e. match everything.
    where_clause: Option<String>,
    bindings: Vec<(String, Value)>,
}

impl CompiledFilter {
    pub fn matches_everything() -> Self {
        CompiledFilter {
            where_clause: None,
            bindings: Vec::new(),
        }
    }

    /// Render ` WHERE <clause>` (including the leading space), or an empty
    /// string when there is no predicate.
    pub fn where_fragment(&self) -> String {
        match &self.where_clause {
            Some(clause) => format!(" WHERE {clause}"),
            None => String::new(),
        }
    }

    pub fn bindings(&self) -> &[(String, Value)] {
        &self.bindings
    }
}

/// Compile a [`FilterInput`] into a [`CompiledFilter`], enforcing the whitelist,
/// length/size bounds, and control-character rejection.
pub fn compile(input: &FilterInput) -> Result<CompiledFilter, CoreError> {
    let mut clauses = Vec::new();
    let mut bindings = Vec::new();
    let mut errors = Vec::new();

    if let Some(tags) = &input.tags {
        match validate_set("tags", tags) {
            Ok(()) => {
                clauses.push("tags CONTAINSALL $tags".to_string());
                bindings.push(("tags".to_string(), serde_json::json!(tags)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(platforms) = &input.platforms {
        match validate_set("platforms", platforms) {
            Ok(()) => {
                clauses.push("platforms CONTAINSALL $platforms".to_string());
                bindings.push(("platforms".to_string(), serde_json::json!(platforms)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(priority) = &input.priority {
        match validate_string("priority", priority) {
            Ok(()) => {
                clauses.push("priority = $priority".to_string());
                bindings.push(("priority".to_string(), serde_json::json!(priority)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(test_type) = &input.test_type {
        match validate_string("test_type", test_type) {
            Ok(()) => {
                clauses.push("test_type = $test_type".to_string());
                bindings.push(("test_type".to_string(), serde_json::json!(test_type)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(prefix) = &input.folder_prefix {
        match validate_set("folder_prefix", prefix) {
            Ok(()) => {
                clauses.push("array::slice(folder_path, 0, array::len($folder_prefix)) = $folder_prefix".to_string());
                bindings.push(("folder_prefix".to_string(), serde_json::json!(prefix)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(related) = &input.related_keys {
        match validate_set("related_keys", related) {
            Ok(()) => {
                clauses.push("array::intersect(related_keys, $related_keys) != []".to_string());
                bindings.push(("related_keys".to_string(), serde_json::json!(related)));
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(pattern) = &input.external_key_pattern {
        match validate_string("external_key_pattern", pattern).and_then(|()| glob_to_regex(pattern)) {
            Ok(regex) => {
                clauses.push("external_key ~ $external_key_pattern".to_string());
                bindings.push(("external_key_pattern".to_string(), serde_json::json!(regex)));
            }
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(CoreError::InvalidInput(errors.join("; ")));
    }

    if clauses.is_empty() {
        return Ok(CompiledFilter::matches_everything());
    }

    Ok(CompiledFilter {
        where_clause: Some(clauses.join(" AND ")),
        bindings,
    })
}

fn validate_string(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field}: must not be empty"));
    }
    if value.chars().count() > MAX_STRING_LEN {
        return Err(format!("{field}: exceeds max length of {MAX_STRING_LEN}"));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(format!("{field}: contains control characters"));
    }
    Ok(())
}

fn validate_set(field: &str, values: &[String]) -> Result<(), String> {
    if values.len() > MAX_SET_LEN {
        return Err(format!("{field}: exceeds max set size of {MAX_SET_LEN}"));
    }
    for v in values {
        validate_string(field, v)?;
    }
    Ok(())
}

/// Translate a restricted glob (only `*` and `?` are special) into an anchored
/// regular expression suitable for SurrealDB's `~` match operator.
fn glob_to_regex(pattern: &str) -> Result<String, String> {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if "\\.+^$()[]{}|".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let compiled = compile(&FilterInput::default()).expect("compiles");
        assert_eq!(compiled.where_fragment(), "");
    }

    #[test]
    fn priority_filter_compiles_with_binding() {
        let input = FilterInput {
            priority: Some("High".to_string()),
            ..Default::default()
        };
        let compiled = compile(&input).expect("compiles");
        assert_eq!(compiled.where_fragment(), " WHERE priority = $priority");
        assert_eq!(compiled.bindings().len(), 1);
    }

    #[test]
    fn oversized_set_is_rejected() {
        let input = FilterInput {
            tags: Some((0..100).map(|i| i.to_string()).collect()),
            ..Default::default()
        };
        assert!(matches!(compile(&input), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn control_characters_are_rejected() {
        let input = FilterInput {
            test_type: Some("bad\u{0007}value".to_string()),
            ..Default::default()
        };
        assert!(matches!(compile(&input), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn glob_pattern_is_anchored_and_escaped() {
        let input = FilterInput {
            external_key_pattern: Some("ABC-*.txt".to_string()),
            ..Default::default()
        };
        let compiled = compile(&input).expect("compiles");
        let (_, pattern) = &compiled.bindings()[0];
        assert_eq!(pattern, &serde_json::json!("^ABC-.*\\.txt$"));
    }

    #[test]
    fn unknown_field_is_rejected_by_deserialization() {
        let raw = serde_json::json!({"tags": ["x"], "bogus": 1});
        let result: Result<FilterInput, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }
}
