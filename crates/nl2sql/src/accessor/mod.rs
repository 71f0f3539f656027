//! Schema Accessor: metadata lookup and raw statement execution over the
//! backing store.
//!
//! The accessor never raises. Metadata failures degrade to empty lists and
//! execution failures come back as `QueryOutcome { success: false, .. }`.
//! It deliberately applies no statement-type filter; read-only enforcement
//! belongs to the pipeline's evaluate step.

pub mod metadata;
pub mod sqlite;
pub mod values;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SchemaCatalog;

pub use metadata::{
    TABLE_COLUMNS_TABLE, TABLE_DESCRIPTION_TABLE, ensure_metadata_tables, open_sqlite_connection,
};
pub use sqlite::SqliteAccessor;

/// Which column names identify tables and columns in the metadata relations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnNamePolicy {
    /// Only `table_name`, `column_name`, `description`, `datatype`.
    #[default]
    Strict,
    /// Migration shim for stores that still use `table`/`tablename` and
    /// `column`/`colname`.
    Legacy,
}

impl ColumnNamePolicy {
    #[must_use]
    pub const fn table_keys(self) -> &'static [&'static str] {
        match self {
            Self::Strict => &["table_name"],
            Self::Legacy => &["table_name", "table", "tablename"],
        }
    }

    #[must_use]
    pub const fn column_keys(self) -> &'static [&'static str] {
        match self {
            Self::Strict => &["column_name"],
            Self::Legacy => &["column_name", "column", "colname"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub rows: Vec<Value>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl QueryOutcome {
    #[must_use]
    pub fn succeeded(columns: Vec<String>, rows: Vec<Value>, duration_ms: u64) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            rows,
            columns,
            error: None,
            duration_ms,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

#[async_trait]
pub trait SchemaAccessor: Send + Sync {
    /// Reads both metadata relations. An unreadable relation yields an empty
    /// list for that part.
    async fn fetch_schema(&self) -> SchemaCatalog;

    /// `COUNT(*)` per table; unreadable tables report zero.
    async fn table_row_estimates(&self, tables: &[String]) -> BTreeMap<String, u64>;

    /// Executes exactly `sql`, binding `params` positionally.
    async fn execute_query(&self, sql: &str, params: &[Value], timeout: Duration) -> QueryOutcome;
}
