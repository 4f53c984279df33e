use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Maximum nesting depth accepted from untrusted input. Every recursive
/// validator threads a depth counter through `descend` so hostile input
/// fails with `TooDeeplyNested` instead of overflowing the call stack.
pub(crate) const MAX_DEPTH: usize = 128;

pub(crate) fn descend(depth: usize) -> Result<usize> {
    if depth >= MAX_DEPTH {
        Err(Error::TooDeeplyNested(MAX_DEPTH))
    } else {
        Ok(depth + 1)
    }
}

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// Opaque 12-byte document identifier, rendered as 24 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse the canonical 24-hex-digit form.
    pub fn parse_str(s: &str) -> Result<Self> {
        let raw = s.as_bytes();
        if raw.len() != 24 {
            return Err(Error::UnsupportedValue(format!("\"{s}\"")));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in raw.chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| Error::UnsupportedValue(format!("\"{s}\"")))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::UnsupportedValue(format!("\"{s}\"")))?;
        }
        Ok(ObjectId(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(24);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A document keeps its entries in insertion order, so diagnostics that
/// depend on which entry is examined first are deterministic.
pub type Document = IndexMap<String, Value>;

/// BSON-style document value: seven primitive kinds plus arrays and
/// documents. Dates are stored as i64 millisecond timestamps for cheap
/// comparison and exact round-tripping.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(i64), // millis since epoch
    ObjectId(ObjectId),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Document(_))
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::ObjectId(_) => "objectid",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    // -- JSON interop -------------------------------------------------------

    /// Convert a JSON value, recognizing the extended-JSON forms
    /// `{"$oid": "<24 hex digits>"}` and `{"$date": <rfc3339 | millis>}`
    /// for the two primitives JSON cannot express directly.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(Error::UnsupportedValue(json.to_string()))
                }
            }
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => {
                let values: Result<Vec<Value>> = items.iter().map(Value::from_json).collect();
                Ok(Value::Array(values?))
            }
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some(oid) = map.get("$oid") {
                        let s = oid
                            .as_str()
                            .ok_or_else(|| Error::UnsupportedValue(json.to_string()))?;
                        return Ok(Value::ObjectId(ObjectId::parse_str(s)?));
                    }
                    if let Some(date) = map.get("$date") {
                        return Ok(Value::DateTime(parse_date_payload(date)?));
                    }
                }
                let mut doc = Document::with_capacity(map.len());
                for (key, val) in map {
                    doc.insert(key.clone(), Value::from_json(val)?);
                }
                Ok(Value::Document(doc))
            }
        }
    }

    /// Convert back to JSON, emitting the same extended-JSON forms that
    /// `from_json` accepts, so conversion round-trips exactly.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Double(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::DateTime(ms) => {
                let rendered = chrono::DateTime::from_timestamp_millis(*ms)
                    .map(|dt| {
                        JsonValue::String(
                            dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                        )
                    })
                    .unwrap_or_else(|| JsonValue::Number((*ms).into()));
                serde_json::json!({ "$date": rendered })
            }
            Value::ObjectId(oid) => serde_json::json!({ "$oid": oid.to_hex() }),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(doc) => JsonValue::Object(document_to_json(doc)),
        }
    }
}

fn parse_date_payload(payload: &JsonValue) -> Result<i64> {
    match payload {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::UnsupportedValue(payload.to_string())),
        JsonValue::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|_| Error::UnsupportedValue(payload.to_string())),
        _ => Err(Error::UnsupportedValue(payload.to_string())),
    }
}

fn document_to_json(doc: &Document) -> serde_json::Map<String, JsonValue> {
    doc.iter()
        .map(|(key, val)| (key.clone(), val.to_json()))
        .collect()
}

/// Render a document for diagnostics without wrapping it in a `Value`.
pub(crate) fn display_document(doc: &Document) -> String {
    JsonValue::Object(document_to_json(doc)).to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json().to_string())
    }
}

// ---------------------------------------------------------------------------
// Key discipline
// ---------------------------------------------------------------------------

/// How a document's keys relate to the `$` operator sigil. Mixing sigil
/// and plain keys in one document is always a grammar error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDiscipline {
    /// Every key begins with `$` (and the document is non-empty).
    Operator,
    /// No key begins with `$`. The empty document is vacuously plain.
    Plain,
}

/// The single chokepoint that disambiguates "set of conditions" from
/// "nested document value". Call this before branching on document shape.
pub fn key_discipline(doc: &Document) -> Result<KeyDiscipline> {
    let operator_keys = doc.keys().filter(|key| key.starts_with('$')).count();
    if operator_keys == 0 {
        Ok(KeyDiscipline::Plain)
    } else if operator_keys == doc.len() {
        Ok(KeyDiscipline::Operator)
    } else {
        Err(Error::MixedKeys(display_document(doc)))
    }
}

// ---------------------------------------------------------------------------
// Value classifier
// ---------------------------------------------------------------------------

/// Check that a value is a plain BSON value: a primitive, an array of
/// plain values, or a document of plain values with no operator keys.
pub fn validate_value(value: &Value) -> Result<()> {
    validate_value_at(value, 0)
}

pub(crate) fn validate_value_at(value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Array(items) => {
            let depth = descend(depth)?;
            for item in items {
                validate_value_at(item, depth)?;
            }
            Ok(())
        }
        Value::Document(doc) => {
            let depth = descend(depth)?;
            match key_discipline(doc)? {
                KeyDiscipline::Operator => Err(Error::OperatorKeyInValue(value.to_string())),
                KeyDiscipline::Plain => {
                    for item in doc.values() {
                        validate_value_at(item, depth)?;
                    }
                    Ok(())
                }
            }
        }
        _ => Ok(()), // the seven primitive kinds
    }
}

// ===========================================================================
// Tests
// ===========================================================================
