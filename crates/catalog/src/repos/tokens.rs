//! Token repository.

use crate::engine::{DeltaOptions, UpsertOptions};
use crate::error::CatalogResult;
use crate::filter::filter_changed;
use crate::merge::MergePolicy;
use crate::models::TokenRow;
use crate::ordering::keys;
use async_trait::async_trait;
use std::collections::HashMap;
use tokencat_core::{AddressHash, HolderCount, HolderDelta, TokenParams};

/// Repository for token records and their holder counters.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    /// Get a token by address.
    async fn get_token(&self, key: &AddressHash) -> CatalogResult<Option<TokenRow>>;

    /// Get multiple tokens by address in a single query.
    /// Returns a map from address to row for tokens that exist.
    async fn get_tokens_batch(
        &self,
        keys: &[AddressHash],
    ) -> CatalogResult<HashMap<AddressHash, TokenRow>>;

    /// Drop candidates whose upsert would not change the stored record.
    ///
    /// Reads a fresh snapshot of the batch keys. Safe to skip: the upsert
    /// applies the same guard under row locks.
    async fn filter_changed_tokens(
        &self,
        candidates: Vec<TokenParams>,
        policy: &MergePolicy,
    ) -> CatalogResult<Vec<TokenParams>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let existing = self.get_tokens_batch(&keys(&candidates)).await?;
        Ok(filter_changed(candidates, &existing, policy))
    }

    /// Insert new tokens and merge candidates into existing ones.
    ///
    /// Rows are locked and written in ascending key order inside one
    /// transaction. Returns the post-operation record of every batch key in
    /// ascending key order, including rows whose write was skipped.
    async fn upsert_tokens(
        &self,
        batch: Vec<TokenParams>,
        options: &UpsertOptions,
    ) -> CatalogResult<Vec<TokenRow>>;

    /// Add signed deltas to initialized holder counts in one bulk statement.
    ///
    /// Duplicate keys are summed. Keys without a record or with a `NULL`
    /// counter are left alone and absent from the result.
    async fn update_holder_counts(
        &self,
        deltas: Vec<HolderDelta>,
        options: &DeltaOptions,
    ) -> CatalogResult<Vec<HolderCount>>;
}
