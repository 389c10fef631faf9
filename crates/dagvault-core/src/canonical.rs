// SPDX-License-Identifier: Apache-2.0
//! Canonical JSON serialization and version hashing.
//!
//! `version_hash = "sha256:" + hex(SHA-256(canonical_json(workflow)))`
//! (spec §6). Canonicalization sorts object keys recursively — a
//! JCS-equivalent for the purposes of this engine, since we only need
//! byte-stability across processes, not interoperability with external JCS
//! implementations.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys and re-serialize, producing bytes that are
/// stable regardless of the original key order in `value`.
#[must_use]
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let sorted = sort_keys(value);
    // `serde_json` preserves insertion order for `Map`, so serializing the
    // sorted tree yields sorted output.
    serde_json::to_vec(&sorted).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                // `map.get` cannot fail: `key` was drawn from `map.keys()`.
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compute the canonical version hash of a workflow document.
#[must_use]
pub fn version_hash(value: &Value) -> String {
    let bytes = canonical_json_bytes(value);
    let digest = Sha256::digest(&bytes);
    format!("sha256:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(version_hash(&a), version_hash(&b));
    }

    #[test]
    fn nested_key_order_does_not_affect_hash() {
        let a = json!({"nodes": [{"id": "n1", "kind": "x"}], "z": 1});
        let b = json!({"z": 1, "nodes": [{"kind": "x", "id": "n1"}]});
        assert_eq!(version_hash(&a), version_hash(&b));
    }

    #[test]
    fn hash_is_prefixed_and_deterministic() {
        let v = json!({"nodes": []});
        let h1 = version_hash(&v);
        let h2 = version_hash(&v);
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
        assert_eq!(h1.len(), "sha256:".len() + 64);
    }

    #[test]
    fn different_content_differs() {
        let a = json!({"nodes": [{"id": "n1"}]});
        let b = json!({"nodes": [{"id": "n2"}]});
        assert_ne!(version_hash(&a), version_hash(&b));
    }
}
