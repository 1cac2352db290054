//! Parser for the IaC engine's `output -json` document.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GravitonError, Result};

/// One named output.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputEntry {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<Value>,
    #[serde(default)]
    pub value: Value,
}

/// The full outputs document: output name to entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct OutputDocument {
    entries: HashMap<String, OutputEntry>,
}

impl OutputDocument {
    pub fn parse(data: &str) -> Result<Self> {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(trimmed)
            .map_err(|e| GravitonError::OutputParse(format!("malformed outputs document: {e}")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entry(&self, key: &str) -> Result<&OutputEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| GravitonError::OutputParse(format!("missing output {key}")))
    }

    /// A string-valued output.
    pub fn string(&self, key: &str) -> Result<String> {
        match &self.entry(key)?.value {
            Value::String(s) => Ok(s.clone()),
            other => Err(wrong_type(key, "string", other)),
        }
    }

    /// A list-of-string output, order preserved.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match &self.entry(key)?.value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(wrong_type(key, "list of strings", other)),
                })
                .collect(),
            other => Err(wrong_type(key, "list of strings", other)),
        }
    }
}

fn wrong_type(key: &str, expected: &str, got: &Value) -> GravitonError {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    };
    GravitonError::OutputParse(format!("output {key} should be a {expected}, found {got}"))
}
