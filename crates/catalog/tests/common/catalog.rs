//! Catalog store test utilities.

use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokencat_catalog::{CatalogError, CatalogResult, CatalogStore, PostgresStore, SqliteStore};
use tokencat_core::AddressHash;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A test catalog wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestCatalog {
    pub store: Arc<dyn CatalogStore>,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestCatalog {
    /// Create a new SQLite catalog in a temporary directory.
    pub async fn new() -> CatalogResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path, 5_000).await?;
        let arc_store = Arc::new(store);

        Ok(Self {
            store: arc_store.clone(),
            sqlite_store: arc_store,
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the catalog store.
    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    /// Get a reference to the SQLite connection pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }

    pub fn handle(&self) -> CatalogHandle {
        CatalogHandle {
            store: self.store(),
            pool: TestPool::Sqlite(self.pool().clone()),
        }
    }
}

/// PostgreSQL test catalog wrapper that manages a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestCatalog {
    pub store: Arc<dyn CatalogStore>,
    pub(crate) postgres_store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestCatalog {
    /// Create a new PostgreSQL test catalog with a testcontainer.
    pub async fn new() -> CatalogResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                CatalogError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = PostgresStore::from_url(&url, 10, None).await?;
        let arc_store = Arc::new(store);

        Ok(Self {
            store: arc_store.clone(),
            postgres_store: arc_store,
            _container: container,
        })
    }

    /// Get a reference to the catalog store.
    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    /// Get a reference to the PostgreSQL connection pool for raw queries.
    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.postgres_store.pool()
    }

    pub fn handle(&self) -> CatalogHandle {
        CatalogHandle {
            store: self.store(),
            pool: TestPool::Postgres(self.pool().clone()),
        }
    }
}

/// Raw pool of either backend, for setting up state the store API cannot produce.
#[derive(Clone)]
pub enum TestPool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<SqlxPostgres>),
}

#[allow(dead_code)]
impl TestPool {
    /// Overwrite a token's holder count directly, bypassing the engines.
    pub async fn set_holder_count(&self, key: AddressHash, holder_count: Option<i64>) {
        let bytes = key.as_bytes().to_vec();
        let affected = match self {
            TestPool::Sqlite(pool) => {
                sqlx::query("UPDATE tokens SET holder_count = ? WHERE contract_address_hash = ?")
                    .bind(holder_count)
                    .bind(bytes)
                    .execute(pool)
                    .await
                    .expect("Failed to set holder count")
                    .rows_affected()
            }
            TestPool::Postgres(pool) => {
                sqlx::query("UPDATE tokens SET holder_count = $1 WHERE contract_address_hash = $2")
                    .bind(holder_count)
                    .bind(bytes)
                    .execute(pool)
                    .await
                    .expect("Failed to set holder count")
                    .rows_affected()
            }
        };
        assert_eq!(affected, 1, "token {key} does not exist");
    }
}

/// Store plus raw pool handed to backend-agnostic tests.
#[derive(Clone)]
pub struct CatalogHandle {
    pub store: Arc<dyn CatalogStore>,
    pub pool: TestPool,
}

/// Try to create a PostgreSQL test catalog, skipping if Docker is unavailable
/// or SKIP_POSTGRES_TESTS is set.
///
/// Only container-start failures (Docker unavailable) cause a skip.
/// Schema, migration, or connection errors still panic so real regressions
/// are not silently swallowed.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestCatalog> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestCatalog::new().await {
        Ok(catalog) => Some(catalog),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
#[allow(dead_code)]
pub async fn run_catalog_test_both<F, Fut>(test_fn: F)
where
    F: Fn(CatalogHandle) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestCatalog::new()
        .await
        .expect("Failed to create SQLite test catalog");
    test_fn.clone()(sqlite.handle()).await;

    // Test with PostgreSQL backend (requires Docker)
    if let Some(postgres) = postgres_or_skip().await {
        test_fn(postgres.handle()).await;
    }
}
