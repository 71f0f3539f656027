//! Loads a folder of CSV files into SQLite and registers each table in the
//! metadata relations so it can be grounded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use tracing::{info, warn};

use crate::accessor::metadata::quote_identifier;
use crate::accessor::{
    TABLE_COLUMNS_TABLE, TABLE_DESCRIPTION_TABLE, ensure_metadata_tables, open_sqlite_connection,
};

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const IMPORTED_COLUMN_TYPE: &str = "TEXT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedTable {
    pub source: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub db_path: String,
    pub imported: Vec<ImportedTable>,
    pub failed: Vec<ImportFailure>,
}

pub fn import_csv_dir(csv_dir: &Path, db_path: &Path) -> Result<ImportReport> {
    if !csv_dir.is_dir() {
        bail!("CSV folder does not exist: {}", csv_dir.display());
    }

    let mut connection = open_sqlite_connection(db_path)?;
    ensure_metadata_tables(&connection)?;

    let files = csv_files(csv_dir)?;
    info!(dir = %csv_dir.display(), files = files.len(), "importing CSV files");

    let mut report = ImportReport {
        db_path: db_path.display().to_string(),
        imported: Vec::new(),
        failed: Vec::new(),
    };
    for file in files {
        let source = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match import_csv_file(&mut connection, &file) {
            Ok(mut table) => {
                info!(%source, table = %table.table_name, rows = table.row_count, "imported CSV");
                table.source = source;
                report.imported.push(table);
            }
            Err(error) => {
                let error = format!("{error:#}");
                warn!(%source, %error, "CSV import failed");
                report.failed.push(ImportFailure { source, error });
            }
        }
    }

    Ok(report)
}

fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list CSV folder: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Imports one file into a fresh table and returns what was created.
pub fn import_csv_file(connection: &mut Connection, path: &Path) -> Result<ImportedTable> {
    let (header, rows) = read_csv(path)?;
    let columns = clean_column_names(&header);

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let table_name = unique_table_name(connection, &sanitize_table_name(&stem))?;

    let transaction = connection
        .transaction()
        .context("failed to start import transaction")?;
    let ddl = columns
        .iter()
        .map(|column| format!("{} {IMPORTED_COLUMN_TYPE}", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    transaction
        .execute_batch(&format!(
            "CREATE TABLE {} ({ddl});",
            quote_identifier(&table_name)
        ))
        .with_context(|| format!("failed to create table `{table_name}`"))?;

    {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let mut insert = transaction
            .prepare(&format!(
                "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
                quote_identifier(&table_name)
            ))
            .context("failed to prepare row insert")?;
        for row in &rows {
            insert
                .execute(params_from_iter(row.iter()))
                .with_context(|| format!("failed to insert row into `{table_name}`"))?;
        }
    }

    register_table(&transaction, &table_name, &columns)?;
    transaction
        .commit()
        .context("failed to commit import transaction")?;

    Ok(ImportedTable {
        source: String::new(),
        table_name,
        columns,
        row_count: rows.len(),
    })
}

fn register_table(connection: &Connection, table_name: &str, columns: &[String]) -> Result<()> {
    connection
        .execute(
            &format!(
                "INSERT OR IGNORE INTO {TABLE_DESCRIPTION_TABLE} (table_name, description) VALUES (?1, '')"
            ),
            params![table_name],
        )
        .context("failed to register table description")?;
    connection
        .execute(
            &format!("DELETE FROM {TABLE_COLUMNS_TABLE} WHERE table_name = ?1"),
            params![table_name],
        )
        .context("failed to clear previous column metadata")?;

    let mut insert = connection
        .prepare(&format!(
            "INSERT INTO {TABLE_COLUMNS_TABLE} (table_name, column_name, description, datatype) VALUES (?1, ?2, '', ?3)"
        ))
        .context("failed to prepare column metadata insert")?;
    for column in columns {
        insert
            .execute(params![table_name, column, IMPORTED_COLUMN_TYPE])
            .context("failed to insert column metadata")?;
    }
    Ok(())
}

/// Header plus data rows, each row padded or cut to the header width.
fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read CSV: {}", path.display()))?;
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    let text = String::from_utf8_lossy(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record
            .with_context(|| format!("failed to parse CSV header: {}", path.display()))?
            .iter()
            .map(|field| field.trim().to_string())
            .collect::<Vec<_>>(),
        None => return Ok((vec!["col1".to_string()], Vec::new())),
    };

    let width = header.len().max(1);
    let mut rows = Vec::new();
    for record in records {
        let record = record.with_context(|| format!("failed to parse CSV row: {}", path.display()))?;
        let mut row = record
            .iter()
            .take(width)
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        row.resize(width, String::new());
        rows.push(row);
    }

    Ok((header, rows))
}

/// Picks the candidate delimiter that occurs most often on the first line,
/// ignoring quoted sections. Falls back to a comma.
#[must_use]
pub fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let mut counts = [0_usize; DELIMITER_CANDIDATES.len()];
    let mut in_quotes = false;
    for byte in first_line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(index) = DELIMITER_CANDIDATES.iter().position(|d| *d == byte) {
            counts[index] += 1;
        }
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .max_by(|(left_index, left), (right_index, right)| {
            left.cmp(right).then(right_index.cmp(left_index))
        })
        .map_or(b',', |(index, _)| DELIMITER_CANDIDATES[index])
}

/// Lowercase, non-alphanumerics to `_`, repeats collapsed, `t_` prefix for a
/// leading digit, `table` when nothing is left.
#[must_use]
pub fn sanitize_table_name(name: &str) -> String {
    let sanitized = collapse_underscores(&name.to_lowercase(), false);
    let sanitized = if sanitized.is_empty() {
        "table".to_string()
    } else {
        sanitized
    };
    if sanitized.starts_with(|ch: char| ch.is_ascii_digit()) {
        format!("t_{sanitized}")
    } else {
        sanitized
    }
}

fn collapse_underscores(text: &str, keep_edges: bool) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        let mapped = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if mapped == '_' && output.ends_with('_') {
            continue;
        }
        output.push(mapped);
    }
    if keep_edges {
        output
    } else {
        output.trim_matches('_').to_string()
    }
}

/// Header cells cleaned into identifiers, blank cells named `col`, and
/// repeats suffixed `_2`, `_3`, ...
#[must_use]
pub fn clean_column_names(header: &[String]) -> Vec<String> {
    let mut used = BTreeSet::new();
    let mut columns = Vec::with_capacity(header.len().max(1));
    for cell in header {
        let trimmed = cell.trim();
        let base = collapse_underscores(if trimmed.is_empty() { "col" } else { trimmed }, true);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while used.contains(&candidate.to_ascii_lowercase()) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        used.insert(candidate.to_ascii_lowercase());
        columns.push(candidate);
    }
    if columns.is_empty() {
        columns.push("col1".to_string());
    }
    columns
}

fn unique_table_name(connection: &Connection, base: &str) -> Result<String> {
    let mut candidate = base.to_string();
    let mut suffix = 0;
    loop {
        let existing = connection
            .query_row(
                "SELECT name FROM sqlite_master WHERE name = ?1",
                params![candidate],
                |row| row.get::<usize, String>(0),
            )
            .optional()
            .context("failed to check for an existing table")?;
        if existing.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }
}
