//! Deterministic cache keys.
//!
//! A key is the SHA-256 of the canonical JSON encoding of an ordered list of
//! components. Object members are emitted with sorted keys and no whitespace,
//! so the key only depends on the values, never on map iteration order.
//! Callers must pass components in a fixed order; by convention the first
//! component names the namespace (`"interaction"`, `"summary"`, `"image"`).

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Lower-case hex SHA-256 of arbitrary text.
pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn compute_key(components: &[Value]) -> String {
    let canonical = to_canonical_json(&Value::Array(components.to_vec()));
    sha256_hex(&canonical)
}
