use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::print_envelope;
use crate::accessor::{SchemaAccessor, SqliteAccessor};
use crate::config::ServiceConfig;
use crate::models::CommandEnvelope;

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {
    /// Also count the rows of every known table.
    #[arg(long, default_value_t = false)]
    pub row_counts: bool,
}

pub async fn run(args: &SchemaArgs, config: &ServiceConfig) -> Result<()> {
    if !config.db_path.is_file() {
        return Err(CommandEnvelope::error(
            "schema",
            "db_not_found",
            format!("database does not exist: {}", config.db_path.display()),
        )
        .into_failure());
    }

    let accessor = SqliteAccessor::new(&config.db_path, config.column_policy);
    let catalog = accessor.fetch_schema().await;
    let tables = catalog.table_names().into_iter().collect::<Vec<_>>();
    let orphan_columns = catalog.orphan_columns().len();
    let row_counts = if args.row_counts {
        Some(accessor.table_row_estimates(&tables).await)
    } else {
        None
    };

    let envelope = CommandEnvelope::ok(
        "schema",
        json!({
            "tables": tables,
            "column_counts": catalog.column_counts(),
            "orphan_columns": orphan_columns,
            "row_counts": row_counts,
            "catalog": catalog,
        }),
    )
    .with_meta("db_path", json!(config.db_path.display().to_string()))
    .with_meta("column_policy", json!(config.column_policy))
    .with_meta("empty", json!(catalog.is_empty()));
    print_envelope(&envelope)
}
