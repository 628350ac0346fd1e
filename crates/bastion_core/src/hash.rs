//! Content hashes and job fingerprints.
//!
//! Uses BLAKE3 for all hashing operations. Job fingerprints are computed over
//! a canonical JSON rendering so that object key order never changes the
//! result.

use crate::job::JobType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A BLAKE3 hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The number of bytes in a hash
    pub const LEN: usize = 32;

    /// Compute BLAKE3 hash of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(hex).map_err(|_| HashError::InvalidHex)?;
        if bytes.len() != Self::LEN {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Invalid hex encoding
    #[error("Invalid hex encoding")]
    InvalidHex,
    /// Invalid length (not 32 bytes)
    #[error("Invalid hash length: {0} (expected 32)")]
    InvalidLength(usize),
}

/// Content fingerprint of a job submission.
///
/// Derived from the job type and the declared parameters only, so two
/// submissions with the same inputs map to the same fingerprint no matter
/// how their parameter objects were ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(Hash);

impl Fingerprint {
    /// Compute the fingerprint of a job type and its declared parameters
    #[must_use]
    pub fn of(job_type: JobType, params: &Value) -> Self {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(job_type.as_str().as_bytes());
        data.push(0);
        data.extend_from_slice(canonical_json(params).as_bytes());
        Self(Hash::compute(&data))
    }

    /// Get the underlying hash
    #[must_use]
    pub const fn hash(&self) -> &Hash {
        &self.0
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fp_{}", self.0.to_hex())
    }
}

/// Render a JSON value canonically: object keys sorted, no whitespace.
///
/// Array order is preserved since it is meaningful.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_hash_compute() {
        let hash = Hash::compute(b"hello world");
        assert_eq!(hash.to_hex().len(), 64);
    }

    #[test]
    fn test_hash_from_to_hex() {
        let hash = Hash::compute(b"test");
        let restored = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, restored);
        assert_eq!(Hash::from_hex("abcd"), Err(HashError::InvalidLength(2)));
        assert_eq!(Hash::from_hex("zz"), Err(HashError::InvalidHex));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, 1], "y": null}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":null,"z":[3,1]},"b":1}"#);
    }

    #[test]
    fn test_fingerprint_key_order_independent() {
        let a = json!({"dataset": "spx_daily", "window": 30, "opts": {"x": 1, "y": 2}});
        let b = json!({"opts": {"y": 2, "x": 1}, "window": 30, "dataset": "spx_daily"});
        assert_eq!(
            Fingerprint::of(JobType::ResearchRun, &a),
            Fingerprint::of(JobType::ResearchRun, &b)
        );
    }

    #[test]
    fn test_fingerprint_depends_on_job_type_and_values() {
        let params = json!({"dataset": "spx_daily"});
        assert_ne!(
            Fingerprint::of(JobType::ResearchRun, &params),
            Fingerprint::of(JobType::BuildData, &params)
        );
        assert_ne!(
            Fingerprint::of(JobType::BuildData, &params),
            Fingerprint::of(JobType::BuildData, &json!({"dataset": "ndx_daily"}))
        );
    }

    #[test]
    fn test_fingerprint_array_order_matters() {
        assert_ne!(
            Fingerprint::of(JobType::BuildData, &json!({"symbols": ["a", "b"]})),
            Fingerprint::of(JobType::BuildData, &json!({"symbols": ["b", "a"]}))
        );
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let mut forward = serde_json::Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), json!(v));
            }
            let mut reverse = serde_json::Map::new();
            for (k, v) in entries.iter().rev() {
                reverse.insert(k.clone(), json!(v));
            }
            prop_assert_eq!(
                Fingerprint::of(JobType::ResearchRun, &Value::Object(forward)),
                Fingerprint::of(JobType::ResearchRun, &Value::Object(reverse))
            );
        }
    }
}
