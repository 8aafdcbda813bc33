//! Call options and batch preparation for the upsert and delta engines.

use crate::dialect::Dialect;
use crate::error::{CatalogError, CatalogResult};
use crate::merge::{MergeConfig, MergePolicy};
use crate::models::PendingCountRow;
use crate::ordering::{order_unique, sum_by_key};
use sqlx::{Database, Pool, Transaction};
use std::time::{Duration, Instant};
use time::{OffsetDateTime, UtcOffset};
use tokencat_core::config::ImportConfig;
use tokencat_core::{HolderCount, HolderDelta, TokenParams};

pub(crate) const UPSERT_OPERATION: &str = "upsert_tokens";
pub(crate) const DELTA_OPERATION: &str = "update_holder_counts";

/// Normalize to UTC at microsecond precision, the resolution both backends store.
fn normalize(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.replace_microsecond(utc.microsecond()).unwrap_or(utc)
}

/// Timestamps proposed for every record of an upsert batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamps {
    pub inserted_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Timestamps {
    pub fn new(inserted_at: OffsetDateTime, updated_at: OffsetDateTime) -> Self {
        Self {
            inserted_at: normalize(inserted_at),
            updated_at: normalize(updated_at),
        }
    }

    /// Both timestamps set to the current time.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self::new(now, now)
    }
}

/// Options for one `upsert_tokens` call.
#[derive(Clone, Debug)]
pub struct UpsertOptions {
    pub timestamps: Timestamps,
    /// End-to-end budget for the call: connection acquisition, lock waits and
    /// every statement share it, however many statements the batch is split into.
    pub timeout: Duration,
    pub policy: MergePolicy,
    pub max_batch_rows: usize,
}

impl UpsertOptions {
    /// Options derived from import configuration.
    pub fn new(config: &ImportConfig, timestamps: Timestamps) -> Self {
        Self {
            timestamps,
            timeout: config.timeout(),
            policy: MergePolicy::new(&MergeConfig::from(config)),
            max_batch_rows: config.max_batch_rows,
        }
    }

    /// Replace the merge policy for this call.
    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options for one `update_holder_counts` call.
#[derive(Clone, Copy, Debug)]
pub struct DeltaOptions {
    /// Written to every updated row.
    pub updated_at: OffsetDateTime,
    /// End-to-end budget for the call, as for upserts.
    pub timeout: Duration,
    pub max_batch_rows: usize,
}

impl DeltaOptions {
    pub fn new(config: &ImportConfig, updated_at: OffsetDateTime) -> Self {
        Self {
            updated_at: normalize(updated_at),
            timeout: config.timeout(),
            max_batch_rows: config.max_batch_rows,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Validate, default and order an upsert batch before it reaches the store.
///
/// Candidates without a holder count start new records at zero. The count is
/// never written to a record that already exists.
pub(crate) fn prepare_upsert(batch: Vec<TokenParams>) -> CatalogResult<Vec<TokenParams>> {
    let batch = batch
        .into_iter()
        .map(|mut candidate| {
            candidate
                .validate()
                .map_err(|e| CatalogError::Validation {
                    key: Some(candidate.contract_address_hash),
                    message: e.to_string(),
                })?;
            candidate.holder_count.get_or_insert(0);
            Ok(candidate)
        })
        .collect::<CatalogResult<Vec<_>>>()?;
    order_unique(batch)
}

/// Sum duplicate deltas and order them by key.
pub(crate) fn prepare_deltas(deltas: Vec<HolderDelta>) -> CatalogResult<Vec<HolderDelta>> {
    sum_by_key(deltas)
}

/// Wall-clock budget shared by every step of one engine call.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    operation: &'static str,
    timeout: Duration,
    /// `None` when the timeout is too large to represent as an instant.
    expires: Option<Instant>,
}

impl Deadline {
    pub(crate) fn start(operation: &'static str, timeout: Duration) -> Self {
        Self {
            operation,
            timeout,
            expires: Instant::now().checked_add(timeout),
        }
    }

    /// The call timeout, reported in errors.
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the call must fail.
    pub(crate) fn remaining(&self) -> CatalogResult<Duration> {
        let Some(expires) = self.expires else {
            return Ok(self.timeout);
        };
        let left = expires.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(self.expired());
        }
        Ok(left)
    }

    pub(crate) fn expired(&self) -> CatalogError {
        CatalogError::LockTimeout {
            operation: self.operation,
            timeout: self.timeout,
        }
    }

    /// Classify a driver error raised inside this call.
    pub(crate) fn map_err(&self, dialect: Dialect, err: sqlx::Error) -> CatalogError {
        CatalogError::from_sqlx(dialect, self.operation, self.timeout, err)
    }
}

/// Open a transaction, bounding pool acquisition by the remaining budget.
pub(crate) async fn begin<DB: Database>(
    pool: &Pool<DB>,
    dialect: Dialect,
    deadline: &Deadline,
) -> CatalogResult<Transaction<'static, DB>> {
    match tokio::time::timeout(deadline.remaining()?, pool.begin()).await {
        Ok(result) => result.map_err(|e| deadline.map_err(dialect, e)),
        Err(_) => Err(deadline.expired()),
    }
}

/// Reject a delta batch if any locked counter would leave the 64-bit range.
pub(crate) fn check_pending_counts(rows: &[PendingCountRow]) -> CatalogResult<()> {
    for row in rows {
        if row.holder_count.checked_add(row.delta).is_none() {
            return Err(CatalogError::Validation {
                key: Some(row.contract_address_hash),
                message: format!(
                    "holder count {} plus delta {} overflows a 64-bit counter",
                    row.holder_count, row.delta
                ),
            });
        }
    }
    Ok(())
}

/// Log the outcome of a delta batch, flagging negative and skipped counters.
pub(crate) fn report_delta_outcome(
    deltas: &[HolderDelta],
    counts: &[HolderCount],
    started: Instant,
) {
    for count in counts.iter().filter(|c| c.holder_count < 0) {
        tracing::warn!(
            contract_address_hash = %count.contract_address_hash,
            holder_count = count.holder_count,
            "Holder count went negative"
        );
    }

    let excluded = deltas.len() - counts.len().min(deltas.len());
    if excluded > 0 {
        tracing::warn!(
            operation = DELTA_OPERATION,
            excluded = excluded,
            "Skipped holder deltas for missing tokens or uninitialized counters"
        );
    }

    tracing::debug!(
        operation = DELTA_OPERATION,
        batch_size = deltas.len(),
        written = counts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Applied holder deltas"
    );
}
