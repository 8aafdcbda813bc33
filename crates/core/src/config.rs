//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Catalog store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CatalogConfig {
    /// SQLite database (single writer; intended for tests and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a connection waits on a locked database before failing, in milliseconds.
        /// Engine calls override this with their own timeout for the duration of the call.
        #[serde(default = "default_sqlite_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer TOKENCAT_CATALOG__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Session-wide statement timeout in milliseconds.
        /// Engine calls tighten this per transaction with their own timeout.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300_000) // 5 minutes
}

fn default_sqlite_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/catalog.db"),
            busy_timeout_ms: default_sqlite_busy_timeout_ms(),
        }
    }
}

impl CatalogConfig {
    /// Validate catalog configuration invariants.
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            CatalogConfig::Sqlite { .. } => Ok(()),
            CatalogConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                // Must have either url OR (host + database)
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Import engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Add the `bridged` flag to the set of merged fields (default: false).
    /// When disabled the flag is neither merged nor written on insert.
    #[serde(default)]
    pub enable_extended_field_set: bool,
    /// Per-call timeout in milliseconds covering lock acquisition and execution.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum rows per physical statement when a batch is split to respect
    /// bind-parameter limits. All statements of one call share a transaction.
    #[serde(default = "default_max_batch_rows")]
    pub max_batch_rows: usize,
}

fn default_timeout_ms() -> u64 {
    crate::DEFAULT_BATCH_TIMEOUT_MS
}

fn default_max_batch_rows() -> usize {
    crate::DEFAULT_MAX_BATCH_ROWS
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            enable_extended_field_set: false,
            timeout_ms: default_timeout_ms(),
            max_batch_rows: default_max_batch_rows(),
        }
    }
}

impl ImportConfig {
    /// Get the per-call timeout as a std::time::Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Validate import configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("import.timeout_ms cannot be 0".to_string());
        }
        if self.max_batch_rows == 0 {
            return Err("import.max_batch_rows cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Catalog store configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Import engine configuration.
    #[serde(default)]
    pub import: ImportConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.catalog.validate()?;
        self.import.validate()
    }
}
