//! Database models mapping to the catalog schema.

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use tokencat_core::{AddressHash, Cataloged, HolderCount};

/// Stored token record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct TokenRow {
    #[sqlx(try_from = "Vec<u8>")]
    pub contract_address_hash: AddressHash,
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Canonical decimal digits.
    pub total_supply: Option<String>,
    pub decimals: Option<i32>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub token_type: Option<String>,
    #[sqlx(try_from = "Option<bool>")]
    pub cataloged: Cataloged,
    pub skip_metadata: Option<bool>,
    pub bridged: Option<bool>,
    /// `None` until initialized outside the import path; delta application skips such rows.
    pub holder_count: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Result row of a holder count update.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct HolderCountRow {
    #[sqlx(try_from = "Vec<u8>")]
    pub contract_address_hash: AddressHash,
    pub holder_count: i64,
}

impl From<HolderCountRow> for HolderCount {
    fn from(row: HolderCountRow) -> Self {
        HolderCount {
            contract_address_hash: row.contract_address_hash,
            holder_count: row.holder_count,
        }
    }
}

/// Stored counter paired with the delta about to be added to it.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct PendingCountRow {
    #[sqlx(try_from = "Vec<u8>")]
    pub contract_address_hash: AddressHash,
    pub holder_count: i64,
    pub delta: i64,
}
