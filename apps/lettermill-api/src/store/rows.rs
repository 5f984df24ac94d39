//! Schema-less access to per-tab dynamic tables.
//!
//! Each tab's imported rows live in their own SQLite table whose columns are
//! whatever the import carried. Table and key-column names are validated
//! against a strict identifier alphabet once, then interpolated
//! double-quoted; the key value itself is always bound.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("no row with key {key:?} in table {table:?}")]
    RowNotFound { table: String, key: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Reads employee rows out of dynamic per-tab tables.
#[derive(Clone)]
pub struct RowStore {
    pool: SqlitePool,
}

const MAX_IDENTIFIER_LEN: usize = 64;

/// Reject any identifier outside `[A-Za-z0-9_]+` or over the length cap.
/// Table names derived from tab names already satisfy this; overrides and
/// key columns come from the catalog and are re-checked here before
/// interpolation.
fn validate_identifier(name: &str) -> Result<&str, RowError> {
    if name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(RowError::InvalidIdentifier(name.to_string()))
    }
}

/// Decode a dynamic column to text: string, then integer, then real. NULL
/// and unsupported types decode to an empty string.
fn decode_column(row: &SqliteRow, index: usize) -> String {
    if let Ok(v) = row.try_get::<String, _>(index) {
        return v;
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return v.to_string();
    }
    String::new()
}

impl RowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch one employee row by key as a column-name to text map.
    pub async fn fetch_row(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<HashMap<String, String>, RowError> {
        let table = validate_identifier(table)?;
        let key_column = validate_identifier(key_column)?;

        let sql = format!(r#"SELECT * FROM "{table}" WHERE "{key_column}" = ? LIMIT 1"#);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RowError::RowNotFound {
                table: table.to_string(),
                key: key.to_string(),
            })?;

        let mut map = HashMap::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            map.insert(column.name().to_string(), decode_column(&row, i));
        }
        debug!(table, key, columns = map.len(), "fetched dynamic row");
        Ok(map)
    }
}
