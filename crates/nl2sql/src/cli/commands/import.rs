use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::print_envelope;
use crate::config::{RuntimePaths, ServiceConfig};
use crate::importer::import_csv_dir;
use crate::models::CommandEnvelope;

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    #[arg(value_name = "CSV_DIR")]
    pub csv_dir: PathBuf,
}

pub fn run(args: &ImportArgs, config: &ServiceConfig, paths: &RuntimePaths) -> Result<()> {
    let csv_dir = paths.resolve(&args.csv_dir)?;
    eprintln!(
        "import: start csv_dir={} db={}",
        csv_dir.display(),
        config.db_path.display()
    );

    let report = import_csv_dir(&csv_dir, &config.db_path)?;
    eprintln!(
        "import: complete imported={} failed={}",
        report.imported.len(),
        report.failed.len()
    );

    let data = serde_json::to_value(&report)?;
    if report.imported.is_empty() && !report.failed.is_empty() {
        return Err(
            CommandEnvelope::error("import", "import_failed", "no CSV file could be imported")
                .with_data(data)
                .into_failure(),
        );
    }

    print_envelope(
        &CommandEnvelope::ok("import", data).with_meta("csv_dir", json!(csv_dir.display().to_string())),
    )
}
