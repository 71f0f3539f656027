use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use super::build_orchestrator;
use crate::cli::app::LlmArgs;
use crate::config::ServiceConfig;
use crate::server::{AppState, router};
use crate::session::SessionStore;

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on, e.g. 127.0.0.1:8000.
    #[arg(long, env = "NL2SQL_BIND", value_name = "ADDR")]
    pub bind: Option<String>,

    #[command(flatten)]
    pub llm: LlmArgs,
}

pub async fn run(config: &ServiceConfig) -> Result<()> {
    if !config.db_path.is_file() {
        warn!(db = %config.db_path.display(), "database file does not exist yet");
    }

    let orchestrator = build_orchestrator(config)?;
    let state = AppState::new(
        orchestrator,
        SessionStore::new(config.session_turn_limit)
            .with_eviction(config.max_sessions, config.session_idle_ttl),
        config.run_defaults.clone(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!(addr = %local_addr, db = %config.db_path.display(), model = %config.llm.model, "serving");
    eprintln!("serve: listening on http://{local_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
