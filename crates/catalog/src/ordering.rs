//! Deterministic key ordering for row lock acquisition.
//!
//! Every write path sorts its keys ascending by raw address bytes before it
//! touches the store. Two transactions that lock overlapping key sets in the
//! same global order cannot wait on each other in a cycle.

use crate::error::{CatalogError, CatalogResult};
use crate::models::TokenRow;
use std::collections::BTreeMap;
use tokencat_core::{AddressHash, HolderDelta, TokenParams};

/// An item identified by a catalog key.
pub trait Keyed {
    fn key(&self) -> AddressHash;
}

impl Keyed for TokenParams {
    fn key(&self) -> AddressHash {
        self.contract_address_hash
    }
}

impl Keyed for HolderDelta {
    fn key(&self) -> AddressHash {
        self.contract_address_hash
    }
}

impl Keyed for TokenRow {
    fn key(&self) -> AddressHash {
        self.contract_address_hash
    }
}

/// Sort items ascending by key, rejecting batches that repeat a key.
pub fn order_unique<T: Keyed>(mut items: Vec<T>) -> CatalogResult<Vec<T>> {
    items.sort_by_key(Keyed::key);
    if let Some(pair) = items.windows(2).find(|w| w[0].key() == w[1].key()) {
        return Err(CatalogError::DuplicateKey(pair[0].key()));
    }
    Ok(items)
}

/// Collapse deltas that share a key by summation, in ascending key order.
///
/// Summing preserves the intent of every submitted delta regardless of how
/// the bulk statement would pair duplicate keys with rows.
pub fn sum_by_key(deltas: Vec<HolderDelta>) -> CatalogResult<Vec<HolderDelta>> {
    let mut sums: BTreeMap<AddressHash, i64> = BTreeMap::new();
    for delta in deltas {
        let sum = sums.entry(delta.contract_address_hash).or_insert(0);
        *sum = sum
            .checked_add(delta.delta)
            .ok_or_else(|| CatalogError::Validation {
                key: Some(delta.contract_address_hash),
                message: "summed holder delta overflows a 64-bit counter".to_string(),
            })?;
    }
    Ok(sums
        .into_iter()
        .map(|(key, delta)| HolderDelta::new(key, delta))
        .collect())
}

/// Extract the sorted key list of an already-ordered batch.
pub(crate) fn keys<T: Keyed>(items: &[T]) -> Vec<AddressHash> {
    items.iter().map(Keyed::key).collect()
}
