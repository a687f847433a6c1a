//! Plan fingerprints.
//!
//! A fingerprint is BLAKE3 in key-derivation mode over the JSON encoding of a
//! value. The context string pins the encoding version, so fingerprints from
//! different layouts of `ShardingPlan` never collide by accident.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const FINGERPRINT_CONTEXT: &str = "shardplan 2024 sharding plan fingerprint v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 8 hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fingerprint any serializable value. Maps inside `v` must be ordered
/// (`BTreeMap`) or the result is not reproducible.
pub fn fingerprint<T: Serialize>(v: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(v)?;
    let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
    hasher.update(&bytes);
    Ok(Hash256(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_hex_and_short_forms() {
        let h = fingerprint(&"table_0").unwrap();
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.to_string(), h.to_hex());
        assert!(h.to_hex().starts_with(&h.short()));
    }

    #[test]
    fn test_fingerprint_follows_content() {
        let mut a = BTreeMap::new();
        a.insert("b", 2u64);
        a.insert("a", 1u64);
        let mut b = BTreeMap::new();
        b.insert("a", 1u64);
        b.insert("b", 2u64);
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        b.insert("c", 3);
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_not_a_plain_blake3_digest() {
        let bytes = serde_json::to_vec(&"x").unwrap();
        let plain: [u8; 32] = blake3::hash(&bytes).into();
        assert_ne!(fingerprint(&"x").unwrap().0, plain);
    }
}
