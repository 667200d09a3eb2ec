//! Byte encodings for document keys and index entries
//!
//! Index entry layout: `[type tag][value bytes][0xFF][document key]`.
//! 0xFF never occurs in UTF-8, so the separator cannot collide with a
//! string value and `value_prefix` selects exactly one value.

use serde_json::Value;

const SEPARATOR: u8 = 0xFF;

const TAG_NULL: u8 = b'z';
const TAG_BOOL: u8 = b'b';
const TAG_NUMBER: u8 = b'n';
const TAG_STRING: u8 = b's';
const TAG_JSON: u8 = b'j';

/// Canonical bytes for a scalar value.
///
/// Integral floats encode like integers so `5` and `5.0` share a key.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            let text = match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => i.to_string(),
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    (f as i64).to_string()
                }
                _ => n.to_string(),
            };
            out.extend_from_slice(text.as_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(s.as_bytes());
        }
        other => {
            out.push(TAG_JSON);
            out.extend_from_slice(other.to_string().as_bytes());
        }
    }
    out
}

/// Prefix selecting every index entry for `value`
pub fn value_prefix(value: &Value) -> Vec<u8> {
    let mut prefix = encode_value(value);
    prefix.push(SEPARATOR);
    prefix
}

/// Index entry key pointing at `doc_key`
pub fn index_entry(value: &Value, doc_key: &[u8]) -> Vec<u8> {
    let mut key = value_prefix(value);
    key.extend_from_slice(doc_key);
    key
}

/// Document key stored after the separator of an index entry
pub fn doc_key_of_entry(entry: &[u8]) -> Option<&[u8]> {
    entry
        .iter()
        .position(|b| *b == SEPARATOR)
        .map(|pos| &entry[pos + 1..])
}

/// Values a document contributes to an index on a field.
///
/// Arrays index each element (multikey); a missing field contributes nothing.
pub fn indexed_values(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => {
            let mut seen: Vec<&Value> = Vec::with_capacity(items.len());
            for item in items {
                if !seen.contains(&item) {
                    seen.push(item);
                }
            }
            seen
        }
        Some(v) => vec![v],
    }
}
