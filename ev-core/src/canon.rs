//! Canonical JSON serialization
//!
//! Deterministic, key-sorted serialization so that identical logical
//! content always hashes identically:
//! - object keys are sorted lexicographically at every nesting level
//! - arrays keep their order
//! - `null` serializes as the literal `null`
//! - no insignificant whitespace

use serde::Serialize;
use serde_json::Value;

use crate::digest::Sha256Digest;
use crate::error::EvidenceResult;

/// Serialize a JSON value canonically
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Serialize any `Serialize` type canonically
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> EvidenceResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

/// SHA-256 over the canonical form of a value
pub fn hash_object<T: Serialize + ?Sized>(value: &T) -> EvidenceResult<Sha256Digest> {
    let canonical = canonicalize(value)?;
    Ok(Sha256Digest::hash(canonical.as_bytes()))
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json string escaping matches JSON.stringify for all valid UTF-8
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_level() {
        let value = json!({
            "b": 1,
            "a": { "z": true, "m": null },
            "c": [ { "y": 2, "x": 1 }, 3 ]
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":null,"z":true},"b":1,"c":[{"x":1,"y":2},3]}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = json!({ "inputHash": "x", "outputHash": "y" });
        let b = json!({ "outputHash": "y", "inputHash": "x" });
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(hash_object(&a).unwrap(), hash_object(&b).unwrap());
    }

    #[test]
    fn test_string_escaping() {
        let value = json!({ "q": "say \"hi\"\n" });
        assert_eq!(canonical_json(&value), r#"{"q":"say \"hi\"\n"}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let a = canonical_json(&json!(["b", "a"]));
        let b = canonical_json(&json!(["a", "b"]));
        assert_ne!(a, b);
    }
}
