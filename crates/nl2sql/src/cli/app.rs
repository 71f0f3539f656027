use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{ask::AskArgs, import::ImportArgs, schema::SchemaArgs, serve::ServeArgs};

#[derive(Debug, Parser)]
#[command(
    name = "nl2sql",
    version,
    about = "Answer natural-language questions over a SQLite database"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// SQLite database holding the data and the metadata relations.
    #[arg(long, global = true, env = "NL2SQL_DB_PATH", value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, global = true, env = "NL2SQL_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    /// Emit tracing output as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
}

/// Language model connection flags shared by commands that call the oracle.
#[derive(Debug, Clone, Default, Args)]
pub struct LlmArgs {
    #[arg(long, env = "NL2SQL_LLM_ENDPOINT", value_name = "URL")]
    pub llm_endpoint: Option<String>,

    #[arg(long, env = "NL2SQL_LLM_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "NL2SQL_LLM_MODEL", value_name = "MODEL")]
    pub llm_model: Option<String>,

    /// Azure OpenAI API version; switches to deployment URLs.
    #[arg(long, env = "NL2SQL_LLM_API_VERSION", value_name = "VERSION")]
    pub llm_api_version: Option<String>,

    /// Directory of `<role>.md` prompt overrides.
    #[arg(long, env = "NL2SQL_PROMPTS_DIR", value_name = "PATH")]
    pub prompts_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP chat service.
    Serve(ServeArgs),
    /// Answer one question and print the pipeline response.
    Ask(AskArgs),
    /// Print the schema catalog the pipeline would ground against.
    Schema(SchemaArgs),
    /// Load a folder of CSV files into the database.
    Import(ImportArgs),
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Serve(_) => "serve",
            Self::Ask(_) => "ask",
            Self::Schema(_) => "schema",
            Self::Import(_) => "import",
        }
    }

    #[must_use]
    pub fn llm_args(&self) -> Option<&LlmArgs> {
        match self {
            Self::Serve(args) => Some(&args.llm),
            Self::Ask(args) => Some(&args.llm),
            Self::Schema(_) | Self::Import(_) => None,
        }
    }
}
