//! Request intake
//!
//! Validates the inbound `{"code": ..., "language": ...}` document and defines
//! the outbound response shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::normalize_language;
use crate::types::ExecutionResult;

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";

/// A validated request: both fields present, language lower-cased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    code: String,
    language: String,
}

impl ExecutionRequest {
    /// Validate `code` and `language` supplied directly
    pub fn new(
        code: impl Into<String>,
        language: impl Into<String>,
    ) -> Result<Self, ValidationErrors> {
        RawExecutionRequest {
            code: Some(Value::String(code.into())),
            language: Some(Value::String(language.into())),
        }
        .validate()
    }

    /// Parse and validate a JSON request body
    pub fn from_json(body: &str) -> Result<Self, IntakeError> {
        let raw: RawExecutionRequest = serde_json::from_str(body)?;
        Ok(raw.validate()?)
    }

    /// The submitted code, byte for byte.
    ///
    /// Unlike the language, code is never trimmed; leading and trailing
    /// whitespace is significant to some programs.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Lower-cased language identifier
    pub fn language(&self) -> &str {
        &self.language
    }
}

/// Request as received, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExecutionRequest {
    #[serde(default, deserialize_with = "present")]
    pub code: Option<Value>,

    #[serde(default, deserialize_with = "present")]
    pub language: Option<Value>,
}

/// Distinguish an explicit `null` (Some(Value::Null)) from an absent field (None)
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RawExecutionRequest {
    /// Check both fields, collecting every problem
    pub fn validate(self) -> Result<ExecutionRequest, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let code = string_field(self.code, &mut errors, "code");
        let language = string_field(self.language, &mut errors, "language");

        match (code, language) {
            (Some(code), Some(language)) if errors.is_empty() => Ok(ExecutionRequest {
                code,
                language: normalize_language(&language),
            }),
            _ => Err(errors),
        }
    }
}

fn string_field(
    value: Option<Value>,
    errors: &mut ValidationErrors,
    field: &str,
) -> Option<String> {
    let text = match value {
        None => {
            errors.add(field, REQUIRED);
            return None;
        }
        Some(Value::Null) => {
            errors.add(field, NOT_NULL);
            return None;
        }
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            errors.add(field, NOT_A_STRING);
            return None;
        }
    };

    if text.trim().is_empty() {
        errors.add(field, NOT_BLANK);
        return None;
    }
    Some(text)
}

/// Per-field validation messages, serialized as `{"field": ["message"]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("invalid request: {}", summary(.fields))]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Messages recorded for `field`
    pub fn field(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of the offending fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

fn summary(fields: &BTreeMap<String, Vec<String>>) -> String {
    fields
        .iter()
        .map(|(field, messages)| format!("{field}: {}", messages.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors turning a request body into an [`ExecutionRequest`]
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

impl IntakeError {
    /// Body for the request-level error response
    pub fn to_json(&self) -> Value {
        match self {
            IntakeError::Malformed(e) => {
                serde_json::json!({ "detail": format!("JSON parse error - {e}") })
            }
            IntakeError::Invalid(errors) => {
                serde_json::to_value(errors).unwrap_or(Value::Null)
            }
        }
    }
}

/// Outbound body for every non-validation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub output: String,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.output,
        }
    }
}
