//! Advisory pre-filter that drops candidates whose upsert would be a no-op.
//!
//! The snapshot may be stale by the time the batch is written. That is safe:
//! the upsert re-evaluates the same write guard against the locked row, so
//! the filter only saves statement work and never decides correctness.

use crate::merge::MergePolicy;
use crate::models::TokenRow;
use std::collections::HashMap;
use tokencat_core::{AddressHash, TokenParams};

/// Keep candidates that are new or that change at least one active field.
///
/// Relative order of the kept candidates is preserved and kept candidates are
/// passed through untouched.
pub fn filter_changed(
    candidates: Vec<TokenParams>,
    existing: &HashMap<AddressHash, TokenRow>,
    policy: &MergePolicy,
) -> Vec<TokenParams> {
    candidates
        .into_iter()
        .filter(|candidate| match existing.get(&candidate.contract_address_hash) {
            None => true,
            Some(row) => policy.would_change(row, candidate),
        })
        .collect()
}
