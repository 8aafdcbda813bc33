//! Test fixtures for generating token data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;
use tokencat_catalog::{DeltaOptions, MergeConfig, MergePolicy, Timestamps, UpsertOptions};
use tokencat_core::config::ImportConfig;
use tokencat_core::{ADDRESS_LEN, AddressHash, HolderDelta, TokenParams};

/// Counter for generating unique addresses across tests sharing a database.
static ADDRESS_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Address with every byte set to `byte`.
pub fn addr(byte: u8) -> AddressHash {
    AddressHash::from_bytes([byte; ADDRESS_LEN])
}

/// A fresh address that no other fixture call returns.
#[allow(dead_code)]
pub fn unique_addr() -> AddressHash {
    let n = ADDRESS_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes[ADDRESS_LEN - 8..].copy_from_slice(&n.to_be_bytes());
    AddressHash::from_bytes(bytes)
}

/// Candidate with only a name.
#[allow(dead_code)]
pub fn named(key: AddressHash, name: &str) -> TokenParams {
    let mut params = TokenParams::new(key);
    params.name = Some(name.to_string());
    params
}

/// Candidate that starts a new record at `holder_count`.
#[allow(dead_code)]
pub fn counted(key: AddressHash, holder_count: i64) -> TokenParams {
    let mut params = TokenParams::new(key);
    params.holder_count = Some(holder_count);
    params
}

/// Monotonic timestamps: `ts(n)` is `n` hours after a fixed epoch.
#[allow(dead_code)]
pub fn ts(hours: i64) -> OffsetDateTime {
    datetime!(2024-01-01 00:00 UTC) + time::Duration::hours(hours)
}

/// Import settings with a short timeout suitable for tests.
#[allow(dead_code)]
pub fn test_import_config() -> ImportConfig {
    ImportConfig {
        enable_extended_field_set: false,
        timeout_ms: 10_000,
        max_batch_rows: 1_000,
    }
}

/// Upsert options with inserted/updated timestamps at the given hours.
#[allow(dead_code)]
pub fn upsert_at(inserted: i64, updated: i64) -> UpsertOptions {
    UpsertOptions::new(
        &test_import_config(),
        Timestamps::new(ts(inserted), ts(updated)),
    )
}

/// Upsert options that merge the extended field set.
#[allow(dead_code)]
pub fn extended_upsert_at(inserted: i64, updated: i64) -> UpsertOptions {
    upsert_at(inserted, updated).with_policy(MergePolicy::new(&MergeConfig {
        enable_extended_field_set: true,
    }))
}

/// Delta options writing `updated_at = ts(hours)`.
#[allow(dead_code)]
pub fn deltas_at(hours: i64) -> DeltaOptions {
    DeltaOptions::new(&test_import_config(), ts(hours))
}

#[allow(dead_code)]
pub fn delta(key: AddressHash, delta: i64) -> HolderDelta {
    HolderDelta::new(key, delta)
}

/// Short timeout used by tests that expect lock waits to fail.
#[allow(dead_code)]
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);
