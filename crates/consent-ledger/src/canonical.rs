//! Canonical byte encoding for ledger payloads.
//!
//! Payloads are maps of named fields to primitive values. Maps are
//! `BTreeMap`s so key order never depends on construction order, and every
//! value is written with a type tag and, where variable-sized, a length
//! prefix. Two payloads encode to the same bytes iff they are logically equal.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// Version marker prepended to every encoding.
pub const CANONICAL_MAGIC: &[u8; 4] = b"CLE1";

/// Nesting limit for lists and maps.
pub const MAX_DEPTH: usize = 32;

/// A primitive (or nested) payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(Fields),
}

/// Named fields of a payload.
pub type Fields = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn timestamp(value: &DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Types that expose their logical content as canonical fields.
pub trait CanonicalFields {
    fn canonical_fields(&self) -> Fields;
}

/// Small helper for building field maps where optional values are omitted.
#[derive(Debug, Default)]
pub struct FieldsBuilder {
    fields: Fields,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn optional(self, name: &str, value: Option<impl Into<FieldValue>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn build(self) -> Fields {
        self.fields
    }
}

/// Encode a field map to canonical bytes.
pub fn encode(fields: &Fields) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(CANONICAL_MAGIC);
    write_map(&mut out, fields, "", 0)?;
    Ok(out)
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_len(out, value.len());
    out.extend_from_slice(value.as_bytes());
}

fn write_map(
    out: &mut Vec<u8>,
    fields: &Fields,
    path: &str,
    depth: usize,
) -> Result<(), EncodingError> {
    if depth > MAX_DEPTH {
        return Err(EncodingError::TooDeep {
            max_depth: MAX_DEPTH,
        });
    }
    out.push(b'm');
    write_len(out, fields.len());
    for (name, value) in fields {
        if name.is_empty() {
            return Err(EncodingError::EmptyFieldName {
                parent: display_path(path),
            });
        }
        let child = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };
        write_str(out, name);
        write_value(out, value, &child, depth + 1)?;
    }
    Ok(())
}

fn write_value(
    out: &mut Vec<u8>,
    value: &FieldValue,
    path: &str,
    depth: usize,
) -> Result<(), EncodingError> {
    match value {
        FieldValue::Null => out.push(b'n'),
        FieldValue::Bool(true) => out.push(b't'),
        FieldValue::Bool(false) => out.push(b'f'),
        FieldValue::Int(v) => {
            out.push(b'i');
            out.extend_from_slice(&v.to_be_bytes());
        }
        FieldValue::Float(v) => {
            if !v.is_finite() {
                return Err(EncodingError::NonFiniteFloat {
                    field: display_path(path),
                });
            }
            // -0.0 and 0.0 compare equal and must encode equally.
            let normalized = if *v == 0.0 { 0.0f64 } else { *v };
            out.push(b'd');
            out.extend_from_slice(&normalized.to_bits().to_be_bytes());
        }
        FieldValue::Text(v) => {
            out.push(b's');
            write_str(out, v);
        }
        FieldValue::List(items) => {
            if depth > MAX_DEPTH {
                return Err(EncodingError::TooDeep {
                    max_depth: MAX_DEPTH,
                });
            }
            out.push(b'l');
            write_len(out, items.len());
            for (index, item) in items.iter().enumerate() {
                write_value(out, item, &format!("{path}[{index}]"), depth + 1)?;
            }
        }
        FieldValue::Map(fields) => write_map(out, fields, path, depth)?,
    }
    Ok(())
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}
