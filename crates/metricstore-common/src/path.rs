//! Dot-path extraction of nested JSON fields

use crate::error::{Error, Result};
use crate::types::Document;
use serde_json::Value;
use std::fmt;

/// A compiled field path such as `"a.b.c"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    path: String,
    tokens: Vec<String>,
}

impl JsonPath {
    /// Compile a dot separated path; tokens are trimmed and empty ones dropped
    pub fn parse(path: &str) -> Result<Self> {
        let tokens: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return Err(Error::InvalidPath(format!("'{path}' contains no field names")));
        }
        Ok(Self {
            path: path.to_string(),
            tokens,
        })
    }

    /// Path addressing one top-level field, taken verbatim
    pub fn field(name: &str) -> Self {
        Self {
            path: name.to_string(),
            tokens: vec![name.to_string()],
        }
    }

    /// The path as it was given
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Walk the document; `None` is the missing node
    pub fn extract<'a>(&self, document: &'a Document) -> Option<&'a Value> {
        let (first, rest) = self.tokens.split_first()?;
        let mut node = document.get(first)?;
        for token in rest {
            node = node.as_object()?.get(token)?;
        }
        Some(node)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Text form of a node used for value matching
///
/// Strings are returned raw, scalars in their JSON form, missing nodes and
/// containers as the empty string.
pub fn text_value(node: Option<&Value>) -> String {
    match node {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Array(_) | Value::Object(_)) | None => String::new(),
    }
}
