use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::{build_orchestrator, print_envelope};
use crate::cli::app::LlmArgs;
use crate::config::ServiceConfig;
use crate::models::{CommandEnvelope, RunRequest, TurnContext};

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(value_name = "MESSAGE")]
    pub message: String,

    #[arg(long, value_name = "TEXT")]
    pub last_query: Option<String>,

    #[arg(long, value_name = "SQL")]
    pub last_sql: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub last_result_summary: Option<String>,

    #[arg(long, value_name = "N")]
    pub max_rows: Option<usize>,

    #[arg(long, value_name = "N")]
    pub max_eval_retries: Option<u32>,

    #[arg(long, value_name = "N")]
    pub max_debug_retries: Option<u32>,

    #[command(flatten)]
    pub llm: LlmArgs,
}

pub async fn run(args: &AskArgs, config: &ServiceConfig) -> Result<()> {
    let mut run_config = config.run_defaults.clone();
    if let Some(rows) = args.max_rows {
        run_config.max_rows = rows;
    }
    if let Some(retries) = args.max_eval_retries {
        run_config.max_eval_retries = retries;
    }
    if let Some(retries) = args.max_debug_retries {
        run_config.max_debug_retries = retries;
    }
    if let Err(message) = run_config.validate() {
        return Err(CommandEnvelope::error("ask", "invalid_run_config", message).into_failure());
    }

    let orchestrator = build_orchestrator(config)?;
    let response = orchestrator
        .run(RunRequest {
            user_message: args.message.clone(),
            context: TurnContext {
                last_query: args.last_query.clone().unwrap_or_default(),
                last_sql: args.last_sql.clone().unwrap_or_default(),
                last_result_summary: args.last_result_summary.clone().unwrap_or_default(),
            },
            config: run_config,
        })
        .await;

    let data = serde_json::to_value(&response).context("failed to encode pipeline response")?;
    if let Some(failure) = &response.failure {
        return Err(CommandEnvelope::error("ask", "pipeline_failed", failure.message.clone())
            .with_data(data)
            .with_error_details(json!({"kind": failure.kind}))
            .into_failure());
    }

    let envelope = CommandEnvelope::ok("ask", data)
        .with_meta("db_path", json!(config.db_path.display().to_string()))
        .with_meta("steps", json!(response.pipeline_log.len()));
    print_envelope(&envelope)
}
