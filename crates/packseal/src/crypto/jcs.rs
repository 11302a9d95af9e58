//! JSON Canonicalization Scheme (RFC 8785) for signed info.
//!
//! Signature documents are signed over their JCS form so that field order
//! and whitespace in the stored part never affect verification.

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize a value to JCS canonical JSON bytes.
///
/// # Example
///
/// ```
/// use packseal::crypto::jcs;
/// use serde_json::json;
///
/// let bytes = jcs::to_vec(&json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(bytes, br#"{"a":1,"b":2}"#);
/// ```
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_jcs::to_vec(value).context("failed to serialize canonical json")
}
