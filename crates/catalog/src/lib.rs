//! Token catalog store and import engines.
//!
//! This crate reconciles observed token metadata with the stored catalog:
//! - Merge policy and write guard for partial token records
//! - Change filter that drops no-op candidates before writing
//! - Key ordering that makes concurrent batches deadlock-free
//! - Batched upserts and bulk holder count deltas
//! - PostgreSQL and SQLite store implementations

pub mod dialect;
pub mod engine;
pub mod error;
pub mod filter;
pub mod merge;
pub mod models;
pub mod ordering;
pub mod postgres;
pub mod repos;
pub mod store;

pub use engine::{DeltaOptions, Timestamps, UpsertOptions};
pub use error::{CatalogError, CatalogResult};
pub use filter::filter_changed;
pub use merge::{Combinator, MergeConfig, MergePolicy, TokenField};
pub use models::TokenRow;
pub use ordering::{Keyed, order_unique, sum_by_key};
pub use postgres::PostgresStore;
pub use repos::TokenRepo;
pub use store::{CatalogStore, SqliteStore};

use std::sync::Arc;
use tokencat_core::config::CatalogConfig;

/// Create a catalog store from configuration.
pub async fn from_config(config: &CatalogConfig) -> CatalogResult<Arc<dyn CatalogStore>> {
    match config {
        CatalogConfig::Sqlite {
            path,
            busy_timeout_ms,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_ms).await?;
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
        CatalogConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(CatalogError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn CatalogStore>)
        }
    }
}
