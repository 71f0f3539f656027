#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use nl2sql::cli::app::{Cli, Command, RuntimeArgs};
use nl2sql::cli::commands;
use nl2sql::config::{ConfigError, ConfigOverrides, RuntimePaths, ServiceConfig, load_service_config};
use nl2sql::models::CommandFailure;
use nl2sql::utils::logging::init_tracing;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    let command_name = cli.command.name();
    eprintln!("nl2sql: starting `{command_name}`");

    match execute(cli) {
        Ok(()) => {
            eprintln!("nl2sql: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            eprintln!("nl2sql: failed `{command_name}` (exit_code={exit_code})");
            match error.downcast_ref::<CommandFailure>() {
                Some(failure) => print_failure(failure),
                None => eprintln!("{error:#}"),
            }
            exit_code
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    init_tracing(cli.runtime.log_json)?;
    let paths = resolve_runtime_paths(&cli.runtime)?;
    let config = resolve_service_config(&cli, &paths)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(async {
        match cli.command {
            Command::Serve(_) => commands::serve::run(&config).await,
            Command::Ask(args) => commands::ask::run(&args, &config).await,
            Command::Schema(args) => commands::schema::run(&args, &config).await,
            Command::Import(args) => commands::import::run(&args, &config, &paths),
        }
    })
}

fn resolve_service_config(cli: &Cli, paths: &RuntimePaths) -> Result<ServiceConfig> {
    let mut overrides = ConfigOverrides {
        db_path: cli.runtime.db.clone(),
        ..ConfigOverrides::default()
    };
    if let Some(llm) = cli.command.llm_args() {
        overrides.prompts_dir = llm.prompts_dir.clone();
        overrides.llm_endpoint = llm.llm_endpoint.clone();
        overrides.llm_api_key = llm.llm_api_key.clone();
        overrides.llm_model = llm.llm_model.clone();
        overrides.llm_api_version = llm.llm_api_version.clone();
    }
    if let Command::Serve(args) = &cli.command {
        overrides.bind = args.bind.clone();
    }

    Ok(load_service_config(
        paths,
        cli.runtime.config.as_deref(),
        &overrides,
    )?)
}

fn print_failure(failure: &CommandFailure) {
    match serde_json::to_string_pretty(failure.envelope()) {
        Ok(encoded) => println!("{encoded}"),
        Err(_) => eprintln!("{failure}"),
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        EXIT_USAGE_ERROR
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    Ok(RuntimePaths::new(&home_dir, &cwd)?)
}
