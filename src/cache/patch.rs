//! Partial update helpers. A field is only touched when its key is present in the payload.

use serde_json::Value;

use crate::error::CacheError;

/// Reads the `id` of a payload, accepting numeric ids as well.
pub fn id(data: &Value, kind: &'static str) -> Result<String, CacheError> {
    string_field(data, "id").ok_or(CacheError::MissingField { kind, field: "id" })
}

/// A string or integer field as an owned string.
pub fn string_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn string(target: &mut String, data: &Value, key: &str) {
    if let Some(value) = string_field(data, key) {
        *target = value;
    }
}

/// A present `null` clears the target.
pub fn optional_string(target: &mut Option<String>, data: &Value, key: &str) {
    match data.get(key) {
        Some(Value::Null) => *target = None,
        Some(_) => {
            if let Some(value) = string_field(data, key) {
                *target = Some(value);
            }
        }
        None => {}
    }
}

pub fn boolean(target: &mut bool, data: &Value, key: &str) {
    if let Some(value) = data.get(key).and_then(Value::as_bool) {
        *target = value;
    }
}

pub fn unsigned(target: &mut u64, data: &Value, key: &str) {
    if let Some(value) = data.get(key).and_then(Value::as_u64) {
        *target = value;
    }
}

pub fn signed(target: &mut i64, data: &Value, key: &str) {
    if let Some(value) = data.get(key).and_then(Value::as_i64) {
        *target = value;
    }
}

/// Replaces a list of ids (or strings) wholesale.
pub fn string_list(target: &mut Vec<String>, data: &Value, key: &str) {
    if let Some(items) = data.get(key).and_then(Value::as_array) {
        *target = items.iter().filter_map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }).collect();
    }
}

/// Items of an array field, empty when absent.
pub fn array<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}
