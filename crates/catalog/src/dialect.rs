//! SQL vocabulary differences between the PostgreSQL and SQLite backends.

/// Name of the token catalog table.
pub(crate) const TOKENS_TABLE: &str = "tokens";

/// Columns written by an upsert, in bind order.
pub(crate) const INSERT_COLUMNS: [&str; 12] = [
    "contract_address_hash",
    "name",
    "symbol",
    "total_supply",
    "decimals",
    "type",
    "cataloged",
    "skip_metadata",
    "bridged",
    "holder_count",
    "inserted_at",
    "updated_at",
];

/// SQL dialect of a catalog backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pseudo-table holding the proposed row inside `ON CONFLICT DO UPDATE`.
    pub(crate) fn excluded(self) -> &'static str {
        match self {
            Dialect::Postgres => "EXCLUDED",
            Dialect::Sqlite => "excluded",
        }
    }

    /// Null-safe inequality operator.
    pub(crate) fn distinct_from(self) -> &'static str {
        match self {
            Dialect::Postgres => "IS DISTINCT FROM",
            Dialect::Sqlite => "IS NOT",
        }
    }

    /// Two-argument minimum.
    pub(crate) fn least(self) -> &'static str {
        match self {
            Dialect::Postgres => "LEAST",
            Dialect::Sqlite => "MIN",
        }
    }

    /// Two-argument maximum.
    pub(crate) fn greatest(self) -> &'static str {
        match self {
            Dialect::Postgres => "GREATEST",
            Dialect::Sqlite => "MAX",
        }
    }

    /// Largest number of bind parameters one statement may carry.
    pub(crate) fn max_bind_params(self) -> usize {
        match self {
            Dialect::Postgres => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }

    /// Column list for reading full token rows.
    ///
    /// PostgreSQL keeps `total_supply` as `NUMERIC`, which is read back as text.
    pub(crate) fn select_columns(self) -> String {
        INSERT_COLUMNS
            .iter()
            .map(|c| match (self, *c) {
                (Dialect::Postgres, "total_supply") => {
                    format!("{}::text AS {}", quote_ident(c), quote_ident(c))
                }
                _ => quote_ident(c),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Wrap a column name in double quotes to handle reserved keywords.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Qualified reference to a column of the stored row.
pub(crate) fn current(column: &str) -> String {
    format!("{}.{}", TOKENS_TABLE, quote_ident(column))
}

/// Qualified reference to a column of the proposed row.
pub(crate) fn proposed(dialect: Dialect, column: &str) -> String {
    format!("{}.{}", dialect.excluded(), quote_ident(column))
}

/// Number of rows that fit in one statement with `columns` binds per row.
pub(crate) fn rows_per_statement(dialect: Dialect, columns: usize, max_batch_rows: usize) -> usize {
    (dialect.max_bind_params() / columns.max(1))
        .min(max_batch_rows)
        .max(1)
}
