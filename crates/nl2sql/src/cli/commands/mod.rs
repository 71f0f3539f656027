pub mod ask;
pub mod import;
pub mod schema;
pub mod serve;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::accessor::SqliteAccessor;
use crate::config::ServiceConfig;
use crate::models::CommandEnvelope;
use crate::oracle::{ChatCompletionsOracle, PromptSet};
use crate::pipeline::Orchestrator;

/// Wires the SQLite accessor, the chat-completions oracle and the prompt
/// set described by `config`.
pub fn build_orchestrator(config: &ServiceConfig) -> Result<Orchestrator> {
    let accessor = SqliteAccessor::new(&config.db_path, config.column_policy);
    let oracle = ChatCompletionsOracle::new(config.chat_config())
        .context("failed to build language model client")?;
    let prompts = match &config.prompts_dir {
        Some(dir) => PromptSet::builtin().with_overrides(dir)?,
        None => PromptSet::builtin(),
    };

    Ok(Orchestrator::new(
        Arc::new(accessor),
        Arc::new(oracle),
        Arc::new(prompts),
        config.orchestrator_settings(),
    ))
}

pub fn print_envelope(envelope: &CommandEnvelope) -> Result<()> {
    let encoded =
        serde_json::to_string_pretty(envelope).context("failed to encode command envelope")?;
    println!("{encoded}");
    Ok(())
}
