//! Per-field value transforms.
//!
//! A transform template is a plain string containing the `${value}` token.
//! Only the first occurrence is substituted; this is not an expression
//! language.

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Token replaced by the source value.
pub const PLACEHOLDER: &str = "${value}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("cannot substitute a {kind} value into template '{template}'")]
    UnsupportedValue {
        template: String,
        kind: &'static str,
    },
    #[error("expected an object record, got {kind}")]
    NotAnObject { kind: &'static str },
    #[error("transformed record has no fields")]
    EmptyRecord,
}

/// Applies a mapping's transform template to one source value.
pub trait ValueTransform: Send + Sync {
    fn apply(&self, template: &str, value: &JsonValue) -> Result<JsonValue, TransformError>;
}

/// Substitutes the first `${value}` with the value's text form. `null` becomes
/// the text `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderTransform;

impl ValueTransform for PlaceholderTransform {
    fn apply(&self, template: &str, value: &JsonValue) -> Result<JsonValue, TransformError> {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Null => "null".to_string(),
            other => {
                return Err(TransformError::UnsupportedValue {
                    template: template.to_string(),
                    kind: json_kind(other),
                });
            }
        };
        Ok(JsonValue::String(template.replacen(PLACEHOLDER, &text, 1)))
    }
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
