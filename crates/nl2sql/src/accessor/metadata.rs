use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

pub const TABLE_DESCRIPTION_TABLE: &str = "table_description";
pub const TABLE_COLUMNS_TABLE: &str = "table_columns";

const CREATE_TABLE_DESCRIPTION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS table_description (
    table_name TEXT NOT NULL PRIMARY KEY,
    description TEXT NOT NULL DEFAULT ''
);
"#;

const CREATE_TABLE_COLUMNS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS table_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    datatype TEXT NOT NULL DEFAULT ''
);
"#;

const CREATE_INDEX_TABLE_COLUMNS_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_table_columns_table
ON table_columns (table_name);
"#;

#[must_use]
pub fn metadata_statements() -> &'static [&'static str] {
    &[
        CREATE_TABLE_DESCRIPTION_SQL,
        CREATE_TABLE_COLUMNS_SQL,
        CREATE_INDEX_TABLE_COLUMNS_SQL,
    ]
}

/// Opens (creating if needed) a database for writers such as the importer.
pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create sqlite parent directory: {}",
                    parent.display()
                )
            })?;
        }
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

/// Opens an existing database without creating it, so an unreachable store
/// surfaces as an error instead of an empty file.
pub fn open_existing_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn ensure_metadata_tables(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&metadata_statements().join("\n"))
        .context("failed to create metadata tables")
}

#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
