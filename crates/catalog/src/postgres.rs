//! PostgreSQL-based catalog store implementation.

use crate::dialect::{self, Dialect, TOKENS_TABLE};
use crate::engine::{
    DELTA_OPERATION, Deadline, DeltaOptions, UPSERT_OPERATION, UpsertOptions, begin,
    check_pending_counts, prepare_deltas, prepare_upsert, report_delta_outcome,
};
use crate::error::{CatalogError, CatalogResult};
use crate::merge::TokenField;
use crate::models::{HolderCountRow, PendingCountRow, TokenRow};
use crate::ordering::keys;
use crate::repos::TokenRepo;
use crate::store::CatalogStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::query_builder::Separated;
use sqlx::{Pool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use tokencat_core::config::PgSslMode;
use tokencat_core::{AddressHash, HolderCount, HolderDelta, TokenParams};

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Lock the counters a delta batch targets, in key order, and read them with their deltas.
const LOCK_PENDING_COUNTS_SQL: &str = r#"
    WITH deltas AS (
        SELECT * FROM UNNEST($1::bytea[], $2::bigint[]) AS d(contract_address_hash, delta)
    )
    SELECT t.contract_address_hash, t.holder_count, d.delta
    FROM tokens t
    JOIN deltas d ON d.contract_address_hash = t.contract_address_hash
    WHERE t.holder_count IS NOT NULL
    ORDER BY t.contract_address_hash
    FOR UPDATE OF t
"#;

/// Bulk delta application.
///
/// `locked` takes row locks in ascending key order before any counter is
/// touched; rows whose counter is `NULL` are never locked or updated.
const APPLY_DELTAS_SQL: &str = r#"
    WITH deltas AS (
        SELECT * FROM UNNEST($1::bytea[], $2::bigint[]) AS d(contract_address_hash, delta)
    ),
    locked AS MATERIALIZED (
        SELECT t.contract_address_hash
        FROM tokens t
        JOIN deltas d ON d.contract_address_hash = t.contract_address_hash
        WHERE t.holder_count IS NOT NULL
        ORDER BY t.contract_address_hash
        FOR UPDATE OF t
    )
    UPDATE tokens t
    SET holder_count = t.holder_count + d.delta,
        updated_at = $3
    FROM locked l
    JOIN deltas d ON d.contract_address_hash = l.contract_address_hash
    WHERE t.contract_address_hash = l.contract_address_hash
    RETURNING t.contract_address_hash, t.holder_count
"#;

fn key_bytes(keys: &[AddressHash]) -> Vec<Vec<u8>> {
    keys.iter().map(|k| k.as_bytes().to_vec()).collect()
}

/// Bound the next statement's lock wait and execution by what is left of the call budget.
async fn set_local_timeouts(
    tx: &mut Transaction<'static, Postgres>,
    deadline: &Deadline,
) -> CatalogResult<()> {
    let value = format!("{}ms", deadline.remaining()?.as_millis().max(1));
    sqlx::query(
        "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)",
    )
    .bind(&value)
    .execute(&mut **tx)
    .await
    .map_err(|e| deadline.map_err(Dialect::Postgres, e))?;
    Ok(())
}

fn bind_field(
    b: &mut Separated<'_, '_, Postgres, &'static str>,
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
            b.push_unseparated("::numeric");
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

/// PostgreSQL-based catalog store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Keeps the password out of the URL so it can come from the environment.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> CatalogResult<Self> {
        // Session default for ad-hoc queries; engine transactions tighten it with SET LOCAL.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn migrate(&self) -> CatalogResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("PostgreSQL catalog schema is up to date");
        Ok(())
    }

    async fn health_check(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenRepo for PostgresStore {
    async fn get_token(&self, key: &AddressHash) -> CatalogResult<Option<TokenRow>> {
        let query = format!(
            "SELECT {} FROM {TOKENS_TABLE} WHERE contract_address_hash = $1",
            Dialect::Postgres.select_columns()
        );
        let row = sqlx::query_as::<_, TokenRow>(&query)
            .bind(key.as_bytes().as_slice())
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

        let query = format!(
            "SELECT {} FROM {TOKENS_TABLE} WHERE contract_address_hash = ANY($1)",
            Dialect::Postgres.select_columns()
        );
        let rows = sqlx::query_as::<_, TokenRow>(&query)
            .bind(key_bytes(keys))
            .fetch_all(&self.pool)
            .await?;

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
        let map_err = |e: sqlx::Error| deadline.map_err(Dialect::Postgres, e);
        let started = Instant::now();
        let batch_keys = key_bytes(&keys(&batch));

        let mut tx = begin(&self.pool, Dialect::Postgres, &deadline).await?;
        set_local_timeouts(&mut tx, &deadline).await?;

        // Lock the rows that already exist, in key order, before writing any of them.
        sqlx::query(&format!(
            "SELECT contract_address_hash FROM {TOKENS_TABLE} \
             WHERE contract_address_hash = ANY($1) \
             ORDER BY contract_address_hash FOR UPDATE"
        ))
        .bind(&batch_keys)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

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
            options.policy.set_clause(Dialect::Postgres),
            options.policy.guard_clause(Dialect::Postgres)
        );
        let rows_per_statement =
            dialect::rows_per_statement(Dialect::Postgres, columns.len(), options.max_batch_rows);
        let ts = options.timestamps;

        let mut written = 0u64;
        for chunk in batch.chunks(rows_per_statement) {
            set_local_timeouts(&mut tx, &deadline).await?;
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {TOKENS_TABLE} ({column_list}) "));
            builder.push_values(chunk, |mut b, candidate| {
                b.push_bind(candidate.contract_address_hash.as_bytes().to_vec());
                for field in &fields {
                    bind_field(&mut b, *field, candidate);
                }
                b.push_bind(candidate.holder_count);
                b.push_bind(ts.inserted_at);
                b.push_bind(ts.updated_at);
            });
            builder.push(&conflict);

            let result = builder.build().execute(&mut *tx).await.map_err(map_err)?;
            written += result.rows_affected();
        }

        set_local_timeouts(&mut tx, &deadline).await?;
        let query = format!(
            "SELECT {} FROM {TOKENS_TABLE} WHERE contract_address_hash = ANY($1) \
             ORDER BY contract_address_hash",
            Dialect::Postgres.select_columns()
        );
        let rows = sqlx::query_as::<_, TokenRow>(&query)
            .bind(&batch_keys)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err)?;

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
        let map_err = |e: sqlx::Error| deadline.map_err(Dialect::Postgres, e);
        let started = Instant::now();

        let delta_keys = key_bytes(&keys(&deltas));
        let delta_values: Vec<i64> = deltas.iter().map(|d| d.delta).collect();

        let mut tx = begin(&self.pool, Dialect::Postgres, &deadline).await?;
        set_local_timeouts(&mut tx, &deadline).await?;

        let pending: Vec<PendingCountRow> = sqlx::query_as(LOCK_PENDING_COUNTS_SQL)
            .bind(&delta_keys)
            .bind(&delta_values)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err)?;
        check_pending_counts(&pending)?;

        set_local_timeouts(&mut tx, &deadline).await?;
        let rows: Vec<HolderCountRow> = sqlx::query_as(APPLY_DELTAS_SQL)
            .bind(&delta_keys)
            .bind(&delta_values)
            .bind(options.updated_at)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;

        let mut counts: Vec<HolderCount> = rows.into_iter().map(HolderCount::from).collect();
        counts.sort_by_key(|c| c.contract_address_hash);
        report_delta_outcome(&deltas, &counts, started);
        Ok(counts)
    }
}
