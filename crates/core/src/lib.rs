//! Core domain types for the token catalog.
//!
//! This crate defines the data model shared by the catalog store and the
//! operator tooling:
//! - Contract address hashes (the catalog primary key)
//! - Partial token candidates and the tri-state `cataloged` flag
//! - Holder count deltas and results
//! - Configuration for the store and the import engines

pub mod address;
pub mod config;
pub mod error;
pub mod token;

pub use address::{ADDRESS_LEN, AddressHash};
pub use error::{Error, Result};
pub use token::{Cataloged, HolderCount, HolderDelta, TokenParams, TotalSupply};

/// Default per-call timeout for upsert and delta batches: 60 seconds
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 60_000;

/// Default number of rows per physical statement: 1000
pub const DEFAULT_MAX_BATCH_ROWS: usize = 1_000;
