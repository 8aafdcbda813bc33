//! Catalog store trait and the SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::repos::TokenRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;

/// Combined catalog store trait.
#[async_trait]
pub trait CatalogStore: TokenRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> CatalogResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> CatalogResult<()>;
}

/// Fixed-width UTC text form, so that `MIN`/`MAX` on the column order chronologically.
fn sqlite_timestamp(ts: OffsetDateTime) -> CatalogResult<String> {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");
    ts.to_offset(time::UtcOffset::UTC)
        .format(format)
        .map_err(|e| CatalogError::Internal(format!("failed to format timestamp: {e}")))
}

/// SQLite-based catalog store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_ms: u64) -> CatalogResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            // One writer at a time; concurrent calls queue on the pool instead of
            // failing with "database is locked".
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            busy_timeout_ms = busy_timeout_ms,
            "Opened SQLite catalog; batches are serialized through a single connection"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn migrate(&self) -> CatalogResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::dialect::{self, Dialect, TOKENS_TABLE};
    use crate::engine::{
        DELTA_OPERATION, Deadline, DeltaOptions, UPSERT_OPERATION, UpsertOptions, begin,
        check_pending_counts, prepare_deltas, prepare_upsert, report_delta_outcome,
    };
    use crate::merge::TokenField;
    use crate::models::{HolderCountRow, PendingCountRow, TokenRow};
    use crate::ordering::keys;
    use sqlx::query_builder::Separated;
    use sqlx::{QueryBuilder, SqliteConnection, Transaction};
    use std::collections::HashMap;
    use std::time::Instant;
    use tokencat_core::{AddressHash, HolderCount, HolderDelta, TokenParams};

    // SQLite has a limit of ~999 parameters in older builds, so IN lists are batched.
    const BATCH_SIZE: usize = 900;

    /// Bound the next statement's lock wait by what is left of the call budget.
    async fn set_busy_timeout(
        tx: &mut Transaction<'static, Sqlite>,
        deadline: &Deadline,
    ) -> CatalogResult<()> {
        let remaining = deadline.remaining()?;
        // PRAGMA does not accept bind parameters.
        sqlx::query(&format!("PRAGMA busy_timeout = {}", remaining.as_millis().max(1)))
            .execute(&mut **tx)
            .await
            .map_err(|e| deadline.map_err(Dialect::Sqlite, e))?;
        Ok(())
    }

    async fn fetch_rows(
        conn: &mut SqliteConnection,
        keys: &[AddressHash],
    ) -> Result<Vec<TokenRow>, sqlx::Error> {
        let mut rows = Vec::with_capacity(keys.len());
        for batch in keys.chunks(BATCH_SIZE) {
            let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
            let query = format!(
                "SELECT {} FROM {TOKENS_TABLE} WHERE contract_address_hash IN ({})",
                Dialect::Sqlite.select_columns(),
                placeholders.join(", ")
            );

            let mut query_builder = sqlx::query_as::<_, TokenRow>(&query);
            for key in batch {
                query_builder = query_builder.bind(key.as_bytes().to_vec());
            }
            rows.extend(query_builder.fetch_all(&mut *conn).await?);
        }
        rows.sort_by_key(|row| row.contract_address_hash);
        Ok(rows)
    }

    /// Start a statement with a `deltas (contract_address_hash, delta)` CTE over `chunk`.
    fn with_deltas(chunk: &[HolderDelta]) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new("WITH deltas (contract_address_hash, delta) AS (");
        builder.push_values(chunk, |mut b, delta| {
            b.push_bind(delta.contract_address_hash.as_bytes().to_vec());
            b.push_bind(delta.delta);
        });
        builder.push(") ");
        builder
    }

    fn bind_field(
        b: &mut Separated<'_, '_, Sqlite, &'static str>,
        field: TokenField,
        candidate: &TokenParams,
    ) {
        match field {
            TokenField::Name => {
                b.push_bind(candidate.name.clone());
            }
            TokenField::Symbol => {
                b.push_bind(candidate.symbol.clone());
            }
            TokenField::TotalSupply => {
                b.push_bind(
                    candidate
                        .total_supply
                        .as_ref()
                        .map(|s| s.as_str().to_string()),
                );
            }
            TokenField::Decimals => {
                b.push_bind(candidate.decimals);
            }
            TokenField::Type => {
                b.push_bind(candidate.token_type.clone());
            }
            TokenField::Cataloged => {
                b.push_bind(candidate.cataloged.as_option());
            }
            TokenField::SkipMetadata => {
                b.push_bind(candidate.skip_metadata);
            }
            TokenField::Bridged => {
                b.push_bind(candidate.bridged);
            }
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn get_token(&self, key: &AddressHash) -> CatalogResult<Option<TokenRow>> {
            let query = format!(
                "SELECT {} FROM {TOKENS_TABLE} WHERE contract_address_hash = ?",
                Dialect::Sqlite.select_columns()
            );
            let row = sqlx::query_as::<_, TokenRow>(&query)
                .bind(key.as_bytes().to_vec())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_tokens_batch(
            &self,
            keys: &[AddressHash],
        ) -> CatalogResult<HashMap<AddressHash, TokenRow>> {
            if keys.is_empty() {
                return Ok(HashMap::new());
            }

            let mut conn = self.pool.acquire().await?;
            let rows = fetch_rows(&mut conn, keys).await?;
            Ok(rows
                .into_iter()
                .map(|row| (row.contract_address_hash, row))
                .collect())
        }

        async fn upsert_tokens(
            &self,
            batch: Vec<TokenParams>,
            options: &UpsertOptions,
        ) -> CatalogResult<Vec<TokenRow>> {
            let batch = prepare_upsert(batch)?;
            if batch.is_empty() {
                return Ok(Vec::new());
            }

            let deadline = Deadline::start(UPSERT_OPERATION, options.timeout);
            let map_err = |e: sqlx::Error| deadline.map_err(Dialect::Sqlite, e);
            let started = Instant::now();
            let inserted_at = sqlite_timestamp(options.timestamps.inserted_at)?;
            let updated_at = sqlite_timestamp(options.timestamps.updated_at)?;

            let fields: Vec<TokenField> = options.policy.fields().collect();
            let mut columns = vec!["contract_address_hash"];
            columns.extend(fields.iter().map(|f| f.column()));
            columns.extend(["holder_count", "inserted_at", "updated_at"]);
            let column_list = columns
                .iter()
                .map(|c| dialect::quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let conflict = format!(
                " ON CONFLICT (contract_address_hash) DO UPDATE SET {} WHERE {}",
                options.policy.set_clause(Dialect::Sqlite),
                options.policy.guard_clause(Dialect::Sqlite)
            );
            let rows_per_statement =
                dialect::rows_per_statement(Dialect::Sqlite, columns.len(), options.max_batch_rows);

            let mut tx = begin(&self.pool, Dialect::Sqlite, &deadline).await?;

            let mut written = 0u64;
            for chunk in batch.chunks(rows_per_statement) {
                set_busy_timeout(&mut tx, &deadline).await?;
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new(format!("INSERT INTO {TOKENS_TABLE} ({column_list}) "));
                builder.push_values(chunk, |mut b, candidate| {
                    b.push_bind(candidate.contract_address_hash.as_bytes().to_vec());
                    for field in &fields {
                        bind_field(&mut b, *field, candidate);
                    }
                    b.push_bind(candidate.holder_count);
                    b.push_bind(inserted_at.clone());
                    b.push_bind(updated_at.clone());
                });
                builder.push(&conflict);

                let result = builder.build().execute(&mut *tx).await.map_err(map_err)?;
                written += result.rows_affected();
            }

            set_busy_timeout(&mut tx, &deadline).await?;
            let rows = fetch_rows(&mut *tx, &keys(&batch)).await.map_err(map_err)?;
            if rows.len() != batch.len() {
                return Err(CatalogError::Internal(format!(
                    "upsert returned {} rows for a batch of {}",
                    rows.len(),
                    batch.len()
                )));
            }

            tx.commit().await.map_err(map_err)?;

            tracing::debug!(
                operation = UPSERT_OPERATION,
                batch_size = batch.len(),
                written = written,
                skipped = batch.len() as u64 - written.min(batch.len() as u64),
                timeout_ms = deadline.timeout().as_millis() as u64,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upserted token batch"
            );

            Ok(rows)
        }

        async fn update_holder_counts(
            &self,
            deltas: Vec<HolderDelta>,
            options: &DeltaOptions,
        ) -> CatalogResult<Vec<HolderCount>> {
            let deltas = prepare_deltas(deltas)?;
            if deltas.is_empty() {
                return Ok(Vec::new());
            }

            let deadline = Deadline::start(DELTA_OPERATION, options.timeout);
            let map_err = |e: sqlx::Error| deadline.map_err(Dialect::Sqlite, e);
            let started = Instant::now();
            let updated_at = sqlite_timestamp(options.updated_at)?;
            // Two binds per delta plus the shared timestamp.
            let rows_per_statement =
                dialect::rows_per_statement(Dialect::Sqlite, 2, options.max_batch_rows)
                    .min(Dialect::Sqlite.max_bind_params() / 2 - 1);

            let mut tx = begin(&self.pool, Dialect::Sqlite, &deadline).await?;

            let mut counts: Vec<HolderCount> = Vec::with_capacity(deltas.len());
            for chunk in deltas.chunks(rows_per_statement) {
                set_busy_timeout(&mut tx, &deadline).await?;

                // SQLite silently widens an overflowing INTEGER sum to REAL.
                let mut builder = with_deltas(chunk);
                builder.push(format!(
                    "SELECT t.contract_address_hash, t.holder_count, d.delta \
                     FROM {TOKENS_TABLE} t \
                     JOIN deltas d ON d.contract_address_hash = t.contract_address_hash \
                     WHERE t.holder_count IS NOT NULL"
                ));
                let pending: Vec<PendingCountRow> = builder
                    .build_query_as()
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(map_err)?;
                check_pending_counts(&pending)?;

                set_busy_timeout(&mut tx, &deadline).await?;
                let mut builder = with_deltas(chunk);
                builder.push(format!(
                    "UPDATE {TOKENS_TABLE} \
                     SET holder_count = holder_count + ( \
                         SELECT d.delta FROM deltas d \
                         WHERE d.contract_address_hash = {TOKENS_TABLE}.contract_address_hash \
                     ), \
                     updated_at = "
                ));
                builder.push_bind(updated_at.clone());
                builder.push(
                    " WHERE holder_count IS NOT NULL \
                     AND contract_address_hash IN (SELECT contract_address_hash FROM deltas) \
                     RETURNING contract_address_hash, holder_count",
                );

                let rows: Vec<HolderCountRow> = builder
                    .build_query_as()
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(map_err)?;
                counts.extend(rows.into_iter().map(HolderCount::from));
            }

            tx.commit().await.map_err(map_err)?;

            counts.sort_by_key(|c| c.contract_address_hash);
            report_delta_outcome(&deltas, &counts, started);
            Ok(counts)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    contract_address_hash BLOB PRIMARY KEY CHECK (length(contract_address_hash) = 20),
    name TEXT,
    symbol TEXT,
    total_supply TEXT,
    decimals INTEGER CHECK (decimals BETWEEN 0 AND 255),
    "type" TEXT,
    cataloged BOOLEAN,
    skip_metadata BOOLEAN,
    bridged BOOLEAN,
    holder_count INTEGER,
    inserted_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_holder_count
    ON tokens (contract_address_hash)
    WHERE holder_count IS NOT NULL;
"#;
