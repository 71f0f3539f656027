use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::Value;
use tracing::{debug, warn};

use super::metadata::{
    TABLE_COLUMNS_TABLE, TABLE_DESCRIPTION_TABLE, open_existing_connection, quote_identifier,
};
use super::values::{json_value_from_sql, sql_value_from_json, text_from_sql};
use super::{ColumnNamePolicy, QueryOutcome, SchemaAccessor};
use crate::models::{ColumnDescriptor, SchemaCatalog, TableDescriptor};
use crate::utils::time::elapsed_ms;

/// A metadata row keyed by lower-cased column name.
pub type RawRow = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone)]
pub struct SqliteAccessor {
    path: PathBuf,
    column_policy: ColumnNamePolicy,
}

impl SqliteAccessor {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, column_policy: ColumnNamePolicy) -> Self {
        Self {
            path: path.into(),
            column_policy,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn column_policy(&self) -> ColumnNamePolicy {
        self.column_policy
    }
}

#[async_trait]
impl SchemaAccessor for SqliteAccessor {
    async fn fetch_schema(&self) -> SchemaCatalog {
        let path = self.path.clone();
        let policy = self.column_policy;
        match tokio::task::spawn_blocking(move || load_catalog(&path, policy)).await {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(%error, "schema fetch worker failed");
                SchemaCatalog::default()
            }
        }
    }

    async fn table_row_estimates(&self, tables: &[String]) -> BTreeMap<String, u64> {
        let path = self.path.clone();
        let tables = tables.to_vec();
        match tokio::task::spawn_blocking(move || count_rows(&path, &tables)).await {
            Ok(estimates) => estimates,
            Err(error) => {
                warn!(%error, "row estimate worker failed");
                BTreeMap::new()
            }
        }
    }

    async fn execute_query(&self, sql: &str, params: &[Value], timeout: Duration) -> QueryOutcome {
        let started = Instant::now();
        let bound = match params
            .iter()
            .map(sql_value_from_json)
            .collect::<Result<Vec<_>>>()
        {
            Ok(bound) => bound,
            Err(error) => return QueryOutcome::failed(format!("{error:#}"), elapsed_ms(started)),
        };

        let path = self.path.clone();
        let connection =
            match tokio::task::spawn_blocking(move || open_existing_connection(&path)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(error)) => {
                    return QueryOutcome::failed(format!("{error:#}"), elapsed_ms(started));
                }
                Err(error) => {
                    return QueryOutcome::failed(
                        format!("query worker failed: {error}"),
                        elapsed_ms(started),
                    );
                }
            };

        let interrupt = connection.get_interrupt_handle();
        let statement_sql = sql.to_string();
        let worker =
            tokio::task::spawn_blocking(move || run_statement(connection, &statement_sql, &bound));

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(Ok(rows))) => {
                debug!(row_count = rows.rows.len(), "statement executed");
                QueryOutcome::succeeded(rows.columns, rows.rows, elapsed_ms(started))
            }
            Ok(Ok(Err(error))) => QueryOutcome::failed(format!("{error:#}"), elapsed_ms(started)),
            Ok(Err(error)) => QueryOutcome::failed(
                format!("query worker failed: {error}"),
                elapsed_ms(started),
            ),
            Err(_) => {
                interrupt.interrupt();
                QueryOutcome::failed(
                    format!("timeout: query exceeded {} ms", timeout.as_millis()),
                    elapsed_ms(started),
                )
            }
        }
    }
}

fn load_catalog(path: &Path, policy: ColumnNamePolicy) -> SchemaCatalog {
    let connection = match open_existing_connection(path) {
        Ok(connection) => connection,
        Err(error) => {
            warn!(error = %format!("{error:#}"), "schema store unavailable");
            return SchemaCatalog::default();
        }
    };

    let table_descriptions = read_relation(&connection, TABLE_DESCRIPTION_TABLE)
        .map(|rows| normalize_table_descriptions(rows, policy))
        .unwrap_or_else(|error| {
            warn!(error = %format!("{error:#}"), "table_description unreadable");
            Vec::new()
        });
    let table_columns = read_relation(&connection, TABLE_COLUMNS_TABLE)
        .map(|rows| normalize_table_columns(rows, policy))
        .unwrap_or_else(|error| {
            warn!(error = %format!("{error:#}"), "table_columns unreadable");
            Vec::new()
        });

    SchemaCatalog::new(table_descriptions, table_columns)
}

fn read_relation(connection: &Connection, relation: &str) -> Result<Vec<RawRow>> {
    let mut statement = connection
        .prepare(&format!("SELECT * FROM {}", quote_identifier(relation)))
        .with_context(|| format!("failed to prepare read of `{relation}`"))?;
    let column_names = statement
        .column_names()
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect::<Vec<_>>();

    let mut rows = statement
        .query([])
        .with_context(|| format!("failed to read `{relation}`"))?;
    let mut raw_rows = Vec::new();
    while let Some(row) = rows
        .next()
        .with_context(|| format!("failed to fetch `{relation}` row"))?
    {
        let mut raw = RawRow::new();
        for (index, name) in column_names.iter().enumerate() {
            let value = row
                .get::<usize, SqlValue>(index)
                .with_context(|| format!("failed to decode `{relation}`.`{name}`"))?;
            raw.insert(name.clone(), value);
        }
        raw_rows.push(raw);
    }

    Ok(raw_rows)
}

fn first_text(row: &RawRow, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .map(text_from_sql)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Drops rows without a table name and keeps the first row per table.
#[must_use]
pub fn normalize_table_descriptions(
    rows: Vec<RawRow>,
    policy: ColumnNamePolicy,
) -> Vec<TableDescriptor> {
    let mut seen = BTreeSet::new();
    let mut descriptors = Vec::new();
    for row in rows {
        let table_name = first_text(&row, policy.table_keys());
        if table_name.is_empty() || !seen.insert(table_name.clone()) {
            continue;
        }
        descriptors.push(TableDescriptor {
            table_name,
            description: first_text(&row, &["description"]),
        });
    }
    descriptors
}

/// Drops rows missing either identifying field.
#[must_use]
pub fn normalize_table_columns(
    rows: Vec<RawRow>,
    policy: ColumnNamePolicy,
) -> Vec<ColumnDescriptor> {
    rows.into_iter()
        .filter_map(|row| {
            let table_name = first_text(&row, policy.table_keys());
            let column_name = first_text(&row, policy.column_keys());
            if table_name.is_empty() || column_name.is_empty() {
                return None;
            }
            Some(ColumnDescriptor {
                table_name,
                column_name,
                description: first_text(&row, &["description"]),
                datatype: first_text(&row, &["datatype"]),
            })
        })
        .collect()
}

fn count_rows(path: &Path, tables: &[String]) -> BTreeMap<String, u64> {
    let connection = open_existing_connection(path).ok();
    tables
        .iter()
        .map(|table| {
            let count = connection
                .as_ref()
                .and_then(|connection| {
                    connection
                        .query_row(
                            &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                            [],
                            |row| row.get::<usize, i64>(0),
                        )
                        .ok()
                })
                .and_then(|count| u64::try_from(count).ok())
                .unwrap_or(0);
            (table.clone(), count)
        })
        .collect()
}

#[derive(Debug)]
struct StatementRows {
    columns: Vec<String>,
    rows: Vec<Value>,
}

fn run_statement(connection: Connection, sql: &str, params: &[SqlValue]) -> Result<StatementRows> {
    let mut statement = connection.prepare(sql).context("failed to prepare query")?;
    let columns = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let mut rows = statement
        .query(params_from_iter(params.iter()))
        .context("failed to execute query")?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().context("failed to fetch query row")? {
        let mut record = serde_json::Map::new();
        for (index, column) in columns.iter().enumerate() {
            let value = row
                .get::<usize, SqlValue>(index)
                .context("failed to decode query column")?;
            record.insert(column.clone(), json_value_from_sql(value));
        }
        records.push(Value::Object(record));
    }

    Ok(StatementRows {
        columns,
        rows: records,
    })
}
