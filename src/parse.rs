use serde_json::{Map, Value};

use crate::{IDENTIFIER_FIELDS, VOLATILE_FIELDS};

/// One leaderboard entrant as stored in a bucket.
pub type Record = Map<String, Value>;

/// The record array of one page plus the total the API reported, if any.
#[derive(Debug, Default, PartialEq)]
pub struct Envelope {
    pub records: Vec<Value>,
    pub total: Option<u64>,
}

impl Envelope {
    /// Accepts `{"data": [...], "total": N}` or a bare array. Any other shape is an empty page.
    pub fn from_value(body: Value) -> Self {
        match body {
            Value::Array(records) => Envelope {
                records,
                total: None,
            },
            Value::Object(mut map) if map.contains_key("data") => {
                let total = map.get("total").and_then(as_u64);
                let records = match map.remove("data") {
                    Some(Value::Array(records)) => records,
                    _ => Vec::new(),
                };
                Envelope { records, total }
            }
            _ => Envelope::default(),
        }
    }
}

/// Drops volatile fields. Non-object entries give `None`.
pub fn normalize(entry: Value) -> Option<Record> {
    match entry {
        Value::Object(mut record) => {
            for field in VOLATILE_FIELDS {
                record.remove(*field);
            }
            Some(record)
        }
        _ => None,
    }
}

/// First present, non-null identifier field, or the canonical JSON of the whole record.
pub fn identifier(record: &Record) -> String {
    IDENTIFIER_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| !value.is_null())
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| canonical(&Value::Object(record.clone())).to_string())
}

/// Same value with object keys in sorted order at every level.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Leaderboard rank of the record; 0 when absent or unusable.
pub fn rank(record: &Record) -> i64 {
    match record.get("rank") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
