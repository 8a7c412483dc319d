//! Content hashing helpers.
//!
//! Every structural hash in the system goes through [`stable_json`] so that
//! identical values always serialize, and therefore hash, identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

/// True when `value` is exactly 64 lowercase hex characters.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Serialize a JSON value with object keys sorted at every depth.
///
/// Arrays keep their order. Scalars use serde_json's own formatting, so
/// `1.0` and `1` stay distinct just as they are in the source value.
pub fn stable_json(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
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
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of the stable serialization of a JSON value.
pub fn stable_sha256(value: &Value) -> String {
    sha256_hex(stable_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&sha256_hex(b"x")));
        assert!(!is_sha256_hex("ABC"));
        assert!(!is_sha256_hex(&"A".repeat(64)));
        assert!(!is_sha256_hex(&"a".repeat(63)));
    }

    #[test]
    fn test_stable_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "c": null}});
        let b = json!({"a": {"c": null, "z": [3, {"x": 2, "y": 1}]}, "b": 1});
        assert_eq!(stable_json(&a), stable_json(&b));
        assert_eq!(
            stable_json(&a),
            r#"{"a":{"c":null,"z":[3,{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_stable_json_escapes_strings() {
        let v = json!({"k\"ey": "line\nbreak"});
        assert_eq!(stable_json(&v), r#"{"k\"ey":"line\nbreak"}"#);
    }
}
