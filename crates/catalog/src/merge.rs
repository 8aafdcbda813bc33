//! Field-level merge policy for token upserts.
//!
//! A policy lists the mergeable fields and, for each one, how an incoming
//! value combines with the stored value. The same policy drives three things
//! that must agree with each other:
//! - the `SET` list of the `ON CONFLICT DO UPDATE` clause,
//! - the write guard in its `WHERE` clause (no-op refreshes are not written),
//! - the in-memory evaluation used by the change filter.
//!
//! `contract_address_hash` is the conflict key and `holder_count` belongs to
//! the delta engine, so neither can appear in a policy. The timestamps always
//! merge as earliest `inserted_at` and latest `updated_at`.

use crate::dialect::{self, Dialect};
use crate::engine::Timestamps;
use crate::error::{CatalogError, CatalogResult};
use crate::models::TokenRow;
use std::fmt;
use std::str::FromStr;
use tokencat_core::TokenParams;
use tokencat_core::config::ImportConfig;

/// A mergeable token column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenField {
    Name,
    Symbol,
    TotalSupply,
    Decimals,
    Type,
    Cataloged,
    SkipMetadata,
    /// Only part of the extended field set.
    Bridged,
}

impl TokenField {
    /// Fields merged in every configuration.
    pub const BASE: [TokenField; 7] = [
        TokenField::Name,
        TokenField::Symbol,
        TokenField::TotalSupply,
        TokenField::Decimals,
        TokenField::Type,
        TokenField::Cataloged,
        TokenField::SkipMetadata,
    ];

    /// Column name in the `tokens` table.
    pub fn column(self) -> &'static str {
        match self {
            TokenField::Name => "name",
            TokenField::Symbol => "symbol",
            TokenField::TotalSupply => "total_supply",
            TokenField::Decimals => "decimals",
            TokenField::Type => "type",
            TokenField::Cataloged => "cataloged",
            TokenField::SkipMetadata => "skip_metadata",
            TokenField::Bridged => "bridged",
        }
    }

    fn provided(self, params: &TokenParams) -> Option<FieldValue<'_>> {
        match self {
            TokenField::Name => params.name.as_deref().map(FieldValue::Text),
            TokenField::Symbol => params.symbol.as_deref().map(FieldValue::Text),
            TokenField::TotalSupply => params
                .total_supply
                .as_ref()
                .map(|s| FieldValue::Text(s.as_str())),
            TokenField::Decimals => params.decimals.map(FieldValue::Int),
            TokenField::Type => params.token_type.as_deref().map(FieldValue::Text),
            TokenField::Cataloged => params.cataloged.as_option().map(FieldValue::Bool),
            TokenField::SkipMetadata => params.skip_metadata.map(FieldValue::Bool),
            TokenField::Bridged => params.bridged.map(FieldValue::Bool),
        }
    }

    fn current(self, row: &TokenRow) -> Option<FieldValue<'_>> {
        match self {
            TokenField::Name => row.name.as_deref().map(FieldValue::Text),
            TokenField::Symbol => row.symbol.as_deref().map(FieldValue::Text),
            TokenField::TotalSupply => row.total_supply.as_deref().map(FieldValue::Text),
            TokenField::Decimals => row.decimals.map(FieldValue::Int),
            TokenField::Type => row.token_type.as_deref().map(FieldValue::Text),
            TokenField::Cataloged => row.cataloged.as_option().map(FieldValue::Bool),
            TokenField::SkipMetadata => row.skip_metadata.map(FieldValue::Bool),
            TokenField::Bridged => row.bridged.map(FieldValue::Bool),
        }
    }

    /// Copy the candidate's value for this field into `row`, absent values included.
    fn assign(self, row: &mut TokenRow, params: &TokenParams) {
        match self {
            TokenField::Name => row.name = params.name.clone(),
            TokenField::Symbol => row.symbol = params.symbol.clone(),
            TokenField::TotalSupply => {
                row.total_supply = params.total_supply.as_ref().map(|s| s.as_str().to_string())
            }
            TokenField::Decimals => row.decimals = params.decimals,
            TokenField::Type => row.token_type = params.token_type.clone(),
            TokenField::Cataloged => row.cataloged = params.cataloged,
            TokenField::SkipMetadata => row.skip_metadata = params.skip_metadata,
            TokenField::Bridged => row.bridged = params.bridged,
        }
    }
}

impl fmt::Display for TokenField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl FromStr for TokenField {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        match s {
            "name" => Ok(TokenField::Name),
            "symbol" => Ok(TokenField::Symbol),
            "total_supply" => Ok(TokenField::TotalSupply),
            "decimals" => Ok(TokenField::Decimals),
            "type" => Ok(TokenField::Type),
            "cataloged" => Ok(TokenField::Cataloged),
            "skip_metadata" => Ok(TokenField::SkipMetadata),
            "bridged" => Ok(TokenField::Bridged),
            "contract_address_hash" | "holder_count" | "inserted_at" | "updated_at" => Err(
                CatalogError::Config(format!("{s} is not a mergeable field")),
            ),
            other => Err(CatalogError::Config(format!("unknown token field: {other}"))),
        }
    }
}

/// How an incoming value combines with the stored one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Combinator {
    /// Incoming value if present, else the stored value.
    #[default]
    Coalesce,
    /// Stored value if present, else the incoming value.
    KeepExisting,
    /// Written on insert only.
    Ignore,
}

#[derive(Debug, PartialEq, Eq)]
enum FieldValue<'a> {
    Text(&'a str),
    Int(i32),
    Bool(bool),
}

/// Settings that select the active mergeable field set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeConfig {
    /// Merge the `bridged` flag in addition to the base fields.
    pub enable_extended_field_set: bool,
}

impl From<&ImportConfig> for MergeConfig {
    fn from(config: &ImportConfig) -> Self {
        Self {
            enable_extended_field_set: config.enable_extended_field_set,
        }
    }
}

/// Ordered list of mergeable fields and their combinators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergePolicy {
    rules: Vec<(TokenField, Combinator)>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl MergePolicy {
    /// Coalesce every field of the configured field set.
    pub fn new(config: &MergeConfig) -> Self {
        let mut rules: Vec<_> = TokenField::BASE
            .iter()
            .map(|field| (*field, Combinator::Coalesce))
            .collect();
        if config.enable_extended_field_set {
            rules.push((TokenField::Bridged, Combinator::Coalesce));
        }
        Self { rules }
    }

    /// Build an override policy from column names.
    ///
    /// Fields left out of the list are neither merged nor written on insert.
    pub fn custom<'a, I>(rules: I) -> CatalogResult<Self>
    where
        I: IntoIterator<Item = (&'a str, Combinator)>,
    {
        let mut parsed: Vec<(TokenField, Combinator)> = Vec::new();
        for (column, combinator) in rules {
            let field: TokenField = column.parse()?;
            if parsed.iter().any(|(f, _)| *f == field) {
                return Err(CatalogError::Config(format!(
                    "{field} listed more than once in merge policy"
                )));
            }
            parsed.push((field, combinator));
        }
        Ok(Self { rules: parsed })
    }

    /// Active fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = TokenField> + '_ {
        self.rules.iter().map(|(field, _)| *field)
    }

    pub fn combinator(&self, field: TokenField) -> Option<Combinator> {
        self.rules
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, c)| *c)
    }

    pub fn contains(&self, field: TokenField) -> bool {
        self.combinator(field).is_some()
    }

    /// Write guard: whether merging `candidate` into `existing` changes any active field.
    pub fn would_change(&self, existing: &TokenRow, candidate: &TokenParams) -> bool {
        self.rules.iter().any(|(field, combinator)| {
            let provided = field.provided(candidate);
            let current = field.current(existing);
            match combinator {
                Combinator::Coalesce => provided.is_some() && provided != current,
                Combinator::KeepExisting => current.is_none() && provided.is_some(),
                Combinator::Ignore => false,
            }
        })
    }

    /// Evaluate the upsert of one candidate in memory.
    ///
    /// A new record takes every active field from the candidate and starts
    /// its holder count at the candidate's value or zero. A conflicting record
    /// that fails the write guard is returned unchanged.
    pub fn merge(
        &self,
        existing: Option<&TokenRow>,
        candidate: &TokenParams,
        timestamps: &Timestamps,
    ) -> TokenRow {
        let Some(existing) = existing else {
            let mut row = TokenRow {
                contract_address_hash: candidate.contract_address_hash,
                name: None,
                symbol: None,
                total_supply: None,
                decimals: None,
                token_type: None,
                cataloged: Default::default(),
                skip_metadata: None,
                bridged: None,
                holder_count: Some(candidate.holder_count.unwrap_or(0)),
                inserted_at: timestamps.inserted_at,
                updated_at: timestamps.updated_at,
            };
            for field in self.fields() {
                field.assign(&mut row, candidate);
            }
            return row;
        };

        if !self.would_change(existing, candidate) {
            return existing.clone();
        }

        let mut row = existing.clone();
        for (field, combinator) in &self.rules {
            let take = match combinator {
                Combinator::Coalesce => field.provided(candidate).is_some(),
                Combinator::KeepExisting => field.current(existing).is_none(),
                Combinator::Ignore => false,
            };
            if take {
                field.assign(&mut row, candidate);
            }
        }
        row.inserted_at = row.inserted_at.min(timestamps.inserted_at);
        row.updated_at = row.updated_at.max(timestamps.updated_at);
        row
    }

    /// Assignments for `ON CONFLICT DO UPDATE SET`.
    pub(crate) fn set_clause(&self, dialect: Dialect) -> String {
        let mut assignments: Vec<String> = self
            .rules
            .iter()
            .filter_map(|(field, combinator)| {
                let col = field.column();
                let (first, second) = match combinator {
                    Combinator::Coalesce => {
                        (dialect::proposed(dialect, col), dialect::current(col))
                    }
                    Combinator::KeepExisting => {
                        (dialect::current(col), dialect::proposed(dialect, col))
                    }
                    Combinator::Ignore => return None,
                };
                Some(format!(
                    "{} = COALESCE({first}, {second})",
                    dialect::quote_ident(col)
                ))
            })
            .collect();

        for (col, func) in [
            ("inserted_at", dialect.least()),
            ("updated_at", dialect.greatest()),
        ] {
            assignments.push(format!(
                "{} = {func}({}, {})",
                dialect::quote_ident(col),
                dialect::current(col),
                dialect::proposed(dialect, col)
            ));
        }
        assignments.join(", ")
    }

    /// Write guard for `ON CONFLICT DO UPDATE ... WHERE`.
    pub(crate) fn guard_clause(&self, dialect: Dialect) -> String {
        let terms: Vec<String> = self
            .rules
            .iter()
            .filter_map(|(field, combinator)| {
                let col = field.column();
                let proposed = dialect::proposed(dialect, col);
                let current = dialect::current(col);
                match combinator {
                    Combinator::Coalesce => Some(format!(
                        "({proposed} IS NOT NULL AND {proposed} {} {current})",
                        dialect.distinct_from()
                    )),
                    Combinator::KeepExisting => Some(format!(
                        "({current} IS NULL AND {proposed} IS NOT NULL)"
                    )),
                    Combinator::Ignore => None,
                }
            })
            .collect();

        if terms.is_empty() {
            "FALSE".to_string()
        } else {
            terms.join(" OR ")
        }
    }
}
