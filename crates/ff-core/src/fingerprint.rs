// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and invocation fingerprints.
//!
//! The dedup layer keys concurrent invocations by
//! `SHA-256(id ":" canonical_json(input))`, with absent or `null` input
//! normalized to `{}`.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our purposes: object keys
/// are sorted (serde_json's `Map` is a `BTreeMap` by default) and numbers
/// serialize consistently.
///
/// # Errors
///
/// Propagates `serde_json` serialization failures.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&v)
}

/// Hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the dedup fingerprint for an invocation.
///
/// `None` and `null` inputs normalize to the empty object, so an explicit
/// `{}` body and a missing body coalesce onto the same execution.
///
/// # Examples
///
/// ```
/// use ff_core::invocation_fingerprint;
/// use serde_json::json;
///
/// let a = invocation_fingerprint("sum", Some(&json!({"a": 1, "b": 2}))).unwrap();
/// let b = invocation_fingerprint("sum", Some(&json!({"b": 2, "a": 1}))).unwrap();
/// assert_eq!(a, b); // key order does not matter
///
/// let c = invocation_fingerprint("sum", None).unwrap();
/// let d = invocation_fingerprint("sum", Some(&json!(null))).unwrap();
/// assert_eq!(c, d); // absent and null both normalize to {}
/// ```
///
/// # Errors
///
/// Propagates `serde_json` serialization failures.
pub fn invocation_fingerprint(
    function_id: &str,
    input: Option<&Value>,
) -> Result<String, serde_json::Error> {
    let serialized = match input {
        None | Some(Value::Null) => "{}".to_string(),
        Some(v) => canonical_json(v)?,
    };
    let mut hasher = Sha256::new();
    hasher.update(function_id.as_bytes());
    hasher.update(b":");
    hasher.update(serialized.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_for_equal_inputs() {
        let a = invocation_fingerprint("f", Some(&json!({"x": [1, 2], "y": "z"}))).unwrap();
        let b = invocation_fingerprint("f", Some(&json!({"y": "z", "x": [1, 2]}))).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_by_id_and_input() {
        let base = invocation_fingerprint("f", Some(&json!({"a": 1}))).unwrap();
        assert_ne!(
            base,
            invocation_fingerprint("g", Some(&json!({"a": 1}))).unwrap()
        );
        assert_ne!(
            base,
            invocation_fingerprint("f", Some(&json!({"a": 2}))).unwrap()
        );
    }

    #[test]
    fn sha256_hex_known_vector() {
        // SHA-256(""); standard vector.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
