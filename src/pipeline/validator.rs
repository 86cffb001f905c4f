//! Response validation: reply text → schema-checked records.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::utils::json_extraction::{escape_stray_backslashes, extract_json_array, JsonExtractionError};

/// Why a reply could not be turned into records.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error(transparent)]
    Extraction(#[from] JsonExtractionError),

    #[error("Invalid JSON: {0}")]
    Syntax(String),

    #[error("Expected a JSON array of records")]
    NotAnArray,

    #[error("Record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Record {index} is missing required key '{key}'")]
    MissingKey { index: usize, key: String },
}

/// One parsed record. Every value has been coerced to a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Value of the key `choices`, matched case-insensitively.
    pub fn choices(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("choices"))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Checks parsed replies against the key set required by a generation mode.
#[derive(Debug, Clone, Copy)]
pub struct ResponseValidator {
    required_keys: &'static [&'static str],
}

impl ResponseValidator {
    pub fn new(required_keys: &'static [&'static str]) -> Self {
        Self { required_keys }
    }

    pub fn required_keys(&self) -> &'static [&'static str] {
        self.required_keys
    }

    /// Extract, clean, parse and validate one reply.
    pub fn parse(&self, text: &str) -> Result<Vec<RawRecord>, RecordError> {
        let region = extract_json_array(text)?;
        let cleaned = escape_stray_backslashes(&region);
        let value: Value =
            serde_json::from_str(&cleaned).map_err(|e| RecordError::Syntax(e.to_string()))?;
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(RecordError::NotAnArray),
        };

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| self.validate(index, item))
            .collect()
    }

    /// Validate one parsed value and coerce its fields to strings.
    pub fn validate(&self, index: usize, value: Value) -> Result<RawRecord, RecordError> {
        let Value::Object(map) = value else {
            return Err(RecordError::NotAnObject { index });
        };

        if let Some(key) = self.required_keys.iter().find(|k| !map.contains_key(**k)) {
            return Err(RecordError::MissingKey {
                index,
                key: key.to_string(),
            });
        }

        let fields = map
            .into_iter()
            .map(|(k, v)| (k, coerce_to_string(v)))
            .collect();
        Ok(RawRecord { fields })
    }
}

fn coerce_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
