//! Content addresses for memoizing worker calls.
//!
//! A key depends only on a frame's role, description and context. Depth,
//! return label and child results are excluded, so the same unit of work reached
//! through different recursion paths memoizes together.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::types::Frame;

/// Compute the hex SHA-256 content address for `frame`.
pub fn cache_key(frame: &Frame) -> String {
    let context: BTreeMap<&str, Value> = frame
        .context
        .iter()
        .map(|(key, value)| (key.as_str(), canonicalize(value)))
        .collect();
    // Serializing a BTreeMap of plain values cannot fail.
    let context_json = serde_json::to_string(&context).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(frame.agent_role.as_bytes());
    hasher.update(b"|");
    hasher.update(frame.description.as_bytes());
    hasher.update(b"|");
    hasher.update(context_json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild `value` with every nested object's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(key, nested)| (key.clone(), canonicalize(nested)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
