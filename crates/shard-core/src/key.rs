//! Tenant key codec.
//!
//! The catalog never persists logical tenant keys directly. Every lookup and
//! every stored record uses the [`RawKey`]: a fixed-width big-endian byte
//! string whose byte order matches the numeric order of the key. Signed keys
//! have their sign bit flipped before encoding, so `-1 < 0` also holds for
//! the raw bytes.
//!
//! The hex form (`0x80001388` for tenant `5000`) is derived from the same
//! bytes and is what the store uses as its table key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::normalize_tenant_name;

/// Logical tenant key used by this deployment.
pub type TenantKey = i32;

/// Errors produced while encoding, decoding, or parsing keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("malformed raw key {0:?}")]
    MalformedHex(String),

    #[error("raw key is {actual} bytes wide, expected {expected}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// A fixed-width, totally ordered key type that can live in the shard map.
pub trait ShardKey: Copy + Ord + fmt::Display {
    /// Encoded width in bytes.
    const WIDTH: usize;

    fn to_raw_bytes(self) -> Vec<u8>;

    /// Inverse of [`ShardKey::to_raw_bytes`]. `None` on a width mismatch.
    fn from_raw_bytes(bytes: &[u8]) -> Option<Self>;

    fn is_negative(self) -> bool;
}

macro_rules! signed_shard_key {
    ($signed:ty, $unsigned:ty) => {
        impl ShardKey for $signed {
            const WIDTH: usize = std::mem::size_of::<$signed>();

            fn to_raw_bytes(self) -> Vec<u8> {
                const SIGN: $unsigned = 1 << (<$unsigned>::BITS - 1);
                ((self as $unsigned) ^ SIGN).to_be_bytes().to_vec()
            }

            fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
                const SIGN: $unsigned = 1 << (<$unsigned>::BITS - 1);
                let arr: [u8; std::mem::size_of::<$signed>()] = bytes.try_into().ok()?;
                Some((<$unsigned>::from_be_bytes(arr) ^ SIGN) as $signed)
            }

            fn is_negative(self) -> bool {
                self < 0
            }
        }
    };
}

macro_rules! unsigned_shard_key {
    ($unsigned:ty) => {
        impl ShardKey for $unsigned {
            const WIDTH: usize = std::mem::size_of::<$unsigned>();

            fn to_raw_bytes(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }

            fn from_raw_bytes(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; std::mem::size_of::<$unsigned>()] = bytes.try_into().ok()?;
                Some(<$unsigned>::from_be_bytes(arr))
            }

            fn is_negative(self) -> bool {
                false
            }
        }
    };
}

signed_shard_key!(i32, u32);
signed_shard_key!(i64, u64);
unsigned_shard_key!(u32);
unsigned_shard_key!(u64);

/// Canonical byte form of a tenant key.
///
/// Serializes as its hex string so persisted records stay readable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RawKey(Vec<u8>);

impl RawKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `0x`-prefixed uppercase hex form used as the store key.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode_upper(&self.0))
    }

    /// Parse a hex form. The prefix and the digits are case-insensitive.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| KeyError::MalformedHex(s.to_string()))?;
        if digits.is_empty() {
            return Err(KeyError::MalformedHex(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|_| KeyError::MalformedHex(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for RawKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<RawKey> for String {
    fn from(key: RawKey) -> Self {
        key.to_hex()
    }
}

/// Which logical keys a deployment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Only keys `>= 0`.
    #[default]
    NonNegative,
    /// The full domain of the key type.
    Any,
}

/// Encodes logical keys into raw keys under a [`KeyPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCodec {
    policy: KeyPolicy,
}

impl KeyCodec {
    pub fn new(policy: KeyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Encode a logical key. Rejects keys outside the policy's domain.
    pub fn encode<K: ShardKey>(&self, key: K) -> Result<RawKey, KeyError> {
        if self.policy == KeyPolicy::NonNegative && key.is_negative() {
            return Err(KeyError::InvalidKey {
                key: key.to_string(),
                reason: "negative keys are not accepted by this deployment".to_string(),
            });
        }
        Ok(RawKey(key.to_raw_bytes()))
    }

    /// Decode a raw key back into its logical key.
    pub fn decode<K: ShardKey>(&self, raw: &RawKey) -> Result<K, KeyError> {
        K::from_raw_bytes(raw.as_bytes()).ok_or(KeyError::WidthMismatch {
            expected: K::WIDTH,
            actual: raw.as_bytes().len(),
        })
    }
}

/// Derive a stable, non-negative tenant key from a tenant display name.
///
/// Two names that normalize to the same database name get the same key.
pub fn derive_tenant_key(name: &str) -> TenantKey {
    let digest = Sha256::digest(normalize_tenant_name(name).as_bytes());
    let head = [digest[0], digest[1], digest[2], digest[3]];
    i32::from_be_bytes(head) & i32::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_tenant_key_with_flipped_sign_bit() {
        let codec = KeyCodec::default();
        let raw = codec.encode(5000_i32).unwrap();
        assert_eq!(raw.as_bytes(), &[0x80, 0x00, 0x13, 0x88]);
        assert_eq!(raw.to_hex(), "0x80001388");
    }

    #[test]
    fn raw_order_matches_numeric_order() {
        let codec = KeyCodec::new(KeyPolicy::Any);
        let keys = [i32::MIN, -5, -1, 0, 1, 4999, 5000, i32::MAX];
        let raws: Vec<RawKey> = keys.iter().map(|k| codec.encode(*k).unwrap()).collect();
        let mut sorted = raws.clone();
        sorted.sort();
        assert_eq!(raws, sorted);
    }

    #[test]
    fn negative_key_rejected_by_default_policy() {
        let err = KeyCodec::default().encode(-1_i32).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey { .. }));
    }

    #[test]
    fn negative_key_accepted_under_any_policy() {
        let codec = KeyCodec::new(KeyPolicy::Any);
        let raw = codec.encode(-1_i32).unwrap();
        assert_eq!(raw.to_hex(), "0x7FFFFFFF");
        assert_eq!(codec.decode::<i32>(&raw).unwrap(), -1);
    }

    #[test]
    fn unsigned_keys_encode_plain_big_endian() {
        let raw = KeyCodec::default().encode(0x0102_u32).unwrap();
        assert_eq!(raw.as_bytes(), &[0, 0, 1, 2]);
    }

    #[test]
    fn hex_parsing_is_case_insensitive() {
        let upper = RawKey::from_hex("0x80001388").unwrap();
        let lower = RawKey::from_hex("0X80001388".to_lowercase().as_str()).unwrap();
        let mixed = RawKey::from_hex("0X8000138a").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(mixed.to_hex(), "0x8000138A");
    }

    #[test]
    fn hex_parsing_rejects_garbage() {
        assert!(RawKey::from_hex("80001388").is_err());
        assert!(RawKey::from_hex("0x").is_err());
        assert!(RawKey::from_hex("0xZZ").is_err());
        assert!(RawKey::from_hex("0x123").is_err());
    }

    #[test]
    fn decode_rejects_wrong_width() {
        let codec = KeyCodec::default();
        let raw = codec.encode(7_i64).unwrap();
        let err = codec.decode::<i32>(&raw).unwrap_err();
        assert_eq!(err, KeyError::WidthMismatch { expected: 4, actual: 8 });
    }

    #[test]
    fn raw_key_serializes_as_hex_string() {
        let raw = KeyCodec::default().encode(5000_i32).unwrap();
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(json, "\"0x80001388\"");
        let back: RawKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn derived_key_ignores_case_and_whitespace() {
        assert_eq!(derive_tenant_key("Contoso Concert Hall"), derive_tenant_key("contosoconcerthall"));
        assert!(derive_tenant_key("Fabrikam Jazz Club") >= 0);
    }
}
