use serde_json::{Map, Value};
use tracing::warn;

use crate::core::error::{ExtractionError, Result};
use crate::core::extractor::{FieldShape, Task};

/// Slice from the first `{` to the last `}` inclusive.
///
/// Returns `None` when either brace is missing or the last `}` comes before
/// the first `{`. Prose, code fences and anything else outside the span are
/// dropped; nothing inside it is inspected.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Turn raw model output into the validated JSON object for `task`.
pub fn sanitize(task: Task, raw: &str) -> Result<Map<String, Value>> {
    let fragment = extract_json_object(raw).ok_or(ExtractionError::MalformedOutput(task))?;

    let parsed: Value = match serde_json::from_str(fragment) {
        Ok(value) => value,
        Err(source) => {
            warn!(task = %task, error = %source, fragment = %fragment, "model returned invalid JSON");
            return Err(ExtractionError::InvalidJson {
                task,
                fragment: fragment.to_string(),
                source,
            });
        }
    };

    let Value::Object(object) = parsed else {
        return Err(ExtractionError::MissingFields(task));
    };

    validate_fields(task, &object)?;
    Ok(object)
}

fn validate_fields(task: Task, object: &Map<String, Value>) -> Result<()> {
    for field in task.required_fields() {
        let valid = match (task.field_shape(), object.get(field)) {
            (_, None) => false,
            (FieldShape::Present, Some(_)) => true,
            (FieldShape::Sequence, Some(value)) => value.is_array(),
        };

        if !valid {
            return Err(ExtractionError::MissingFields(task));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_object_strips_prose_and_fences() {
        let raw = "Sure! ```json\n{\"a\": 1}\n``` Hope that helps.";
        assert_eq!(extract_json_object(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_object_requires_ordered_braces() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("only { open"), None);
        assert_eq!(extract_json_object("only } close"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_extract_json_object_spans_first_to_last_brace() {
        let raw = "{\"a\": 1} and {\"b\": 2}";
        assert_eq!(extract_json_object(raw), Some(raw));
    }

    #[test]
    fn test_summary_passes_through_unchanged() {
        let raw = "Here you go: {\"summary_es\":\"Resumen.\",\"summary_en\":\"Summary.\"} bye";
        let result = sanitize(Task::Summarize, raw).unwrap();

        assert_eq!(
            Value::Object(result),
            json!({"summary_es": "Resumen.", "summary_en": "Summary."})
        );
    }

    #[test]
    fn test_key_order_is_preserved() {
        let raw = r#"{"summary_es":"Resumen.","summary_en":"Summary."}"#;
        let result = sanitize(Task::Summarize, raw).unwrap();
        assert_eq!(serde_json::to_string(&result).unwrap(), raw);

        let raw = r#"{"zeta":0,"key_points_es":["b","a"],"key_points_en":["b","a"],"alpha":1}"#;
        let result = sanitize(Task::KeyPoints, raw).unwrap();
        assert_eq!(serde_json::to_string(&result).unwrap(), raw);
    }

    #[test]
    fn test_summary_only_requires_presence() {
        let raw = r#"{"summary_es": 1, "summary_en": null, "extra": true}"#;
        let result = sanitize(Task::Summarize, raw).unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result["extra"], json!(true));
    }

    #[test]
    fn test_summary_missing_english_field() {
        let err = sanitize(Task::Summarize, "blah {\"summary_es\":\"x\"} blah").unwrap_err();

        assert!(matches!(err, ExtractionError::MissingFields(Task::Summarize)));
        assert!(err.to_string().contains("both languages"));
    }

    #[test]
    fn test_no_braces_is_malformed_output() {
        let err = sanitize(Task::Summarize, "I cannot help with that.").unwrap_err();

        assert!(matches!(err, ExtractionError::MalformedOutput(Task::Summarize)));
        assert!(err.to_string().contains("did not return valid JSON"));
    }

    #[test]
    fn test_invalid_json_keeps_fragment_out_of_message() {
        let raw = "{\"summary_es\": \"secret upstream text\", }";
        let err = sanitize(Task::Summarize, raw).unwrap_err();

        match &err {
            ExtractionError::InvalidJson { fragment, .. } => assert_eq!(fragment, raw),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.to_string().contains("secret upstream text"));
    }

    #[test]
    fn test_key_points_scalar_fails_shape_check() {
        let raw = r#"{"key_points_es":"not a list","key_points_en":["a"]}"#;
        let err = sanitize(Task::KeyPoints, raw).unwrap_err();

        assert!(matches!(err, ExtractionError::MissingFields(Task::KeyPoints)));
        assert!(err.to_string().contains("list"));
    }

    #[test]
    fn test_key_points_missing_field() {
        let err = sanitize(Task::KeyPoints, r#"{"key_points_es":["a"]}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingFields(Task::KeyPoints)));
    }

    #[test]
    fn test_key_points_lists_pass_through() {
        let raw = r#"{"key_points_es":["a","b","c"],"key_points_en":["a","b","c"]}"#;
        let result = sanitize(Task::KeyPoints, raw).unwrap();

        assert_eq!(
            Value::Object(result),
            json!({"key_points_es": ["a", "b", "c"], "key_points_en": ["a", "b", "c"]})
        );
    }

    #[test]
    fn test_key_points_length_is_not_enforced() {
        let raw = r#"{"key_points_es":[],"key_points_en":["a","b","c","d","e","f","g"]}"#;
        assert!(sanitize(Task::KeyPoints, raw).is_ok());
    }
}
