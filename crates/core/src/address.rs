//! Contract address hash: the catalog's primary key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a contract address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A contract address represented as 20 raw bytes.
///
/// Ordering compares the raw bytes lexicographically, which matches how both
/// PostgreSQL (`bytea`) and SQLite (`BLOB`) order the key column. Every path
/// that acquires row locks sorts by this ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressHash([u8; ADDRESS_LEN]);

impl AddressHash {
    /// Create a new AddressHash from raw bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, rejecting anything that is not exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            crate::Error::InvalidAddress(format!(
                "expected {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Parse from hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(crate::Error::InvalidAddress(format!(
                "expected {} hex chars, got {}",
                ADDRESS_LEN * 2,
                digits.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        for (i, chunk) in digits.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidAddress(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidAddress(format!("{s}: {e}")))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as `0x`-prefixed lowercase hex string.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(2 + ADDRESS_LEN * 2);
        out.push_str("0x");
        for b in self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl TryFrom<Vec<u8>> for AddressHash {
    type Error = crate::Error;

    fn try_from(bytes: Vec<u8>) -> crate::Result<Self> {
        Self::from_slice(&bytes)
    }
}

impl FromStr for AddressHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressHash({})", self.to_hex())
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for AddressHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AddressHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
