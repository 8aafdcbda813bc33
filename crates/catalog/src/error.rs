//! Catalog store error types.

use crate::dialect::Dialect;
use std::time::Duration;
use thiserror::Error;
use tokencat_core::AddressHash;

fn format_key(key: &Option<AddressHash>) -> String {
    match key {
        Some(key) => format!(" {key}"),
        None => String::new(),
    }
}

/// Catalog operation errors.
///
/// Every error aborts the whole call: nothing of a failed batch is visible
/// afterwards, and callers retry by resubmitting the identical batch.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate key in batch: {0}")]
    DuplicateKey(AddressHash),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid candidate{}: {message}", format_key(.key))]
    Validation {
        key: Option<AddressHash>,
        message: String,
    },

    #[error("{operation} did not acquire row locks within {timeout:?}")]
    LockTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("store unavailable during {operation}: {message}")]
    StoreUnavailable {
        operation: &'static str,
        message: String,
    },

    #[error("constraint violation during {operation}: {message}")]
    Constraint {
        operation: &'static str,
        message: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// Whether resubmitting the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::LockTimeout { .. } | CatalogError::StoreUnavailable { .. }
        )
    }

    /// Classify a driver error raised while executing `operation`.
    pub(crate) fn from_sqlx(
        dialect: Dialect,
        operation: &'static str,
        timeout: Duration,
        err: sqlx::Error,
    ) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => CatalogError::LockTimeout { operation, timeout },
            sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => CatalogError::StoreUnavailable {
                operation,
                message: err.to_string(),
            },
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                match classify_code(dialect, &code) {
                    ErrorClass::LockTimeout => CatalogError::LockTimeout { operation, timeout },
                    ErrorClass::Constraint => CatalogError::Constraint {
                        operation,
                        message: db_err.message().to_string(),
                    },
                    ErrorClass::Unavailable => CatalogError::StoreUnavailable {
                        operation,
                        message: db_err.message().to_string(),
                    },
                    ErrorClass::Other => CatalogError::Database(err),
                }
            }
            _ => CatalogError::Database(err),
        }
    }
}

impl From<tokencat_core::Error> for CatalogError {
    fn from(e: tokencat_core::Error) -> Self {
        match e {
            tokencat_core::Error::InvalidAddress(msg) => CatalogError::InvalidKey(msg),
            other => CatalogError::Validation {
                key: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        CatalogError::Config(e.to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ErrorClass {
    LockTimeout,
    Constraint,
    Unavailable,
    Other,
}

fn classify_code(dialect: Dialect, code: &str) -> ErrorClass {
    match dialect {
        Dialect::Postgres => match code {
            // lock_not_available, query_canceled (statement_timeout)
            "55P03" | "57014" => ErrorClass::LockTimeout,
            // admin_shutdown, crash_shutdown, cannot_connect_now
            "57P01" | "57P02" | "57P03" => ErrorClass::Unavailable,
            c if c.starts_with("23") || c.starts_with("22") => ErrorClass::Constraint,
            c if c.starts_with("08") => ErrorClass::Unavailable,
            _ => ErrorClass::Other,
        },
        Dialect::Sqlite => {
            // Extended result codes carry the primary code in the low byte.
            let Ok(extended) = code.parse::<i32>() else {
                return ErrorClass::Other;
            };
            match extended & 0xff {
                // SQLITE_BUSY, SQLITE_LOCKED
                5 | 6 => ErrorClass::LockTimeout,
                // SQLITE_CONSTRAINT, SQLITE_MISMATCH
                19 | 20 => ErrorClass::Constraint,
                // SQLITE_CANTOPEN, SQLITE_IOERR
                14 | 10 => ErrorClass::Unavailable,
                _ => ErrorClass::Other,
            }
        }
    }
}
