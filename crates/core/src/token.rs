//! Token catalog domain types.

use crate::address::AddressHash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Upper bound on `decimals` reported by token contracts (`uint8`).
pub const MAX_DECIMALS: i32 = 255;

/// Maximum number of digits in a total supply (`NUMERIC(100)` column).
pub const MAX_TOTAL_SUPPLY_DIGITS: usize = 100;

/// Whether a token has been cataloged by the metadata fetcher.
///
/// `Unknown` is distinct from `False`: a record inserted without an opinion
/// stays `Unknown` so that a later `False` is still recognized as new
/// information. Stored as a nullable boolean where `NULL` means `Unknown`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Cataloged {
    #[default]
    Unknown,
    True,
    False,
}

impl Cataloged {
    /// Convert from the nullable storage representation.
    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            None => Self::Unknown,
            Some(true) => Self::True,
            Some(false) => Self::False,
        }
    }

    /// Convert to the nullable storage representation.
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }
}

impl From<bool> for Cataloged {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl From<Option<bool>> for Cataloged {
    fn from(value: Option<bool>) -> Self {
        Self::from_option(value)
    }
}

impl fmt::Display for Cataloged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::True => "true",
            Self::False => "false",
        };
        write!(f, "{s}")
    }
}

impl Serialize for Cataloged {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cataloged {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<bool>::deserialize(deserializer).map(Self::from_option)
    }
}

/// A token's total supply as an unbounded non-negative integer.
///
/// Held as a canonical decimal digit string (no sign, no leading zeros) so
/// that equal supplies compare equal both in memory and in the SQLite text
/// column.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TotalSupply(String);

impl TotalSupply {
    /// Parse and canonicalize a decimal digit string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::Error::InvalidTotalSupply(format!(
                "expected decimal digits, got {s:?}"
            )));
        }
        let trimmed = s.trim_start_matches('0');
        let canonical = if trimmed.is_empty() { "0" } else { trimmed };
        if canonical.len() > MAX_TOTAL_SUPPLY_DIGITS {
            return Err(crate::Error::InvalidTotalSupply(format!(
                "{} digits exceeds maximum of {MAX_TOTAL_SUPPLY_DIGITS}",
                canonical.len()
            )));
        }
        Ok(Self(canonical.to_string()))
    }

    /// Get the digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for TotalSupply {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for TotalSupply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TotalSupply({})", self.0)
    }
}

impl fmt::Display for TotalSupply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TotalSupply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TotalSupply {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Upstream feeds send uint256 values as strings; small values may arrive as numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Self::from(n)),
        }
    }
}

/// A partial token record observed by chain indexing.
///
/// Only the address is required. `None` (or `Cataloged::Unknown`) means the
/// observer has no opinion about that field and the stored value must be kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParams {
    pub contract_address_hash: AddressHash,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub total_supply: Option<TotalSupply>,
    #[serde(default)]
    pub decimals: Option<i32>,
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub cataloged: Cataloged,
    #[serde(default)]
    pub skip_metadata: Option<bool>,
    /// Only honored when the extended field set is active.
    #[serde(default)]
    pub bridged: Option<bool>,
    /// Initial counter for a brand-new record. Never applied to existing records.
    #[serde(default)]
    pub holder_count: Option<i64>,
}

impl TokenParams {
    /// Create an empty candidate for an address.
    pub fn new(contract_address_hash: AddressHash) -> Self {
        Self {
            contract_address_hash,
            name: None,
            symbol: None,
            total_supply: None,
            decimals: None,
            token_type: None,
            cataloged: Cataloged::Unknown,
            skip_metadata: None,
            bridged: None,
            holder_count: None,
        }
    }

    /// Check field-level invariants that must hold before touching the store.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(decimals) = self.decimals
            && !(0..=MAX_DECIMALS).contains(&decimals)
        {
            return Err(crate::Error::InvalidField {
                field: "decimals",
                message: format!("{decimals} is outside 0..={MAX_DECIMALS}"),
            });
        }
        if let Some(holder_count) = self.holder_count
            && holder_count < 0
        {
            return Err(crate::Error::InvalidField {
                field: "holder_count",
                message: format!("initial holder count {holder_count} is negative"),
            });
        }
        Ok(())
    }
}

/// A signed change to a token's holder count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderDelta {
    pub contract_address_hash: AddressHash,
    pub delta: i64,
}

impl HolderDelta {
    /// Create a new delta.
    pub fn new(contract_address_hash: AddressHash, delta: i64) -> Self {
        Self {
            contract_address_hash,
            delta,
        }
    }
}

/// A token's holder count after an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderCount {
    pub contract_address_hash: AddressHash,
    pub holder_count: i64,
}
