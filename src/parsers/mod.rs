// File: src/parsers/mod.rs

pub mod apache;

use std::collections::BTreeMap;

use crate::error::ParseError;

pub use apache::{Grammar, DEFAULT_FORMAT};

pub const METHOD_FIELD: &str = "request_method";
pub const STATUS_FIELD: &str = "status";

/// One parsed access log line: field name -> raw value.
///
/// Always carries a request method and a status; anything else depends on
/// the grammar that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    fields: BTreeMap<String, String>,
}

impl LogRecord {
    /// Builds a record, rejecting field sets without a method or status.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingField`] naming the first absent field.
    pub fn from_fields(fields: BTreeMap<String, String>) -> Result<Self, ParseError> {
        for field in [METHOD_FIELD, STATUS_FIELD] {
            match fields.get(field) {
                Some(value) if !value.is_empty() => {}
                _ => return Err(ParseError::MissingField { field }),
            }
        }
        Ok(Self { fields })
    }

    pub fn method(&self) -> &str {
        self.get(METHOD_FIELD).unwrap_or_default()
    }

    pub fn status(&self) -> &str {
        self.get(STATUS_FIELD).unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
