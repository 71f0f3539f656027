//! Service configuration: built-in defaults, then an optional JSON file,
//! then environment variables and CLI flags.

pub mod paths;

use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::accessor::ColumnNamePolicy;
use crate::models::RunConfig;
use crate::oracle::ChatCompletionsConfig;
use crate::pipeline::{
    DEFAULT_ORACLE_TIMEOUT, DEFAULT_PREVIEW_ROWS, DEFAULT_QUERY_TIMEOUT, OrchestratorSettings,
};
use crate::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TTL, DEFAULT_TURN_LIMIT};

pub use paths::RuntimePaths;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_DB_FILE_NAME: &str = "nl2sql.db";
pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid bind address `{value}`: {source}")]
    Bind {
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid run defaults: {0}")]
    RunDefaults(String),

    #[error("{0}")]
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Set for Azure OpenAI deployments.
    pub api_version: Option<String>,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            api_version: None,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub llm: LlmConfig,
    pub prompts_dir: Option<PathBuf>,
    pub oracle_timeout: Duration,
    pub query_timeout: Duration,
    pub preview_rows: usize,
    pub enforce_read_only: bool,
    pub column_policy: ColumnNamePolicy,
    pub session_turn_limit: usize,
    pub max_sessions: usize,
    pub session_idle_ttl: Duration,
    pub run_defaults: RunConfig,
}

impl ServiceConfig {
    pub fn defaults(paths: &RuntimePaths) -> Result<Self, ConfigError> {
        Ok(Self {
            db_path: paths.state_dir().join(DEFAULT_DB_FILE_NAME),
            bind: parse_bind(DEFAULT_BIND)?,
            llm: LlmConfig::default(),
            prompts_dir: None,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            enforce_read_only: true,
            column_policy: ColumnNamePolicy::Strict,
            session_turn_limit: DEFAULT_TURN_LIMIT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            run_defaults: RunConfig::default(),
        })
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            oracle_timeout: self.oracle_timeout,
            query_timeout: self.query_timeout,
            preview_rows: self.preview_rows,
            enforce_read_only: self.enforce_read_only,
        }
    }

    #[must_use]
    pub fn chat_config(&self) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            endpoint: self.llm.endpoint.clone(),
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            api_version: self.llm.api_version.clone(),
            temperature: self.llm.temperature,
            request_timeout: self.oracle_timeout,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle_timeout.is_zero() {
            return Err(ConfigError::Zero("oracle_timeout_ms"));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::Zero("query_timeout_ms"));
        }
        if self.preview_rows == 0 {
            return Err(ConfigError::Zero("preview_rows"));
        }
        if self.session_turn_limit == 0 {
            return Err(ConfigError::Zero("session_turn_limit"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Zero("max_sessions"));
        }
        if self.session_idle_ttl.is_zero() {
            return Err(ConfigError::Zero("session_idle_secs"));
        }
        self.run_defaults
            .validate()
            .map_err(ConfigError::RunDefaults)
    }
}

/// Shape of the optional JSON config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub bind: Option<String>,
    pub prompts_dir: Option<PathBuf>,
    pub oracle_timeout_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub preview_rows: Option<usize>,
    pub enforce_read_only: Option<bool>,
    pub legacy_column_aliases: Option<bool>,
    pub session_turn_limit: Option<usize>,
    pub max_sessions: Option<usize>,
    pub session_idle_secs: Option<u64>,
    pub db_dialect: Option<String>,
    pub max_rows: Option<usize>,
    pub max_eval_retries: Option<u32>,
    pub max_debug_retries: Option<u32>,
    #[serde(default)]
    pub llm: FileLlmConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLlmConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_version: Option<String>,
    pub temperature: Option<f32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Highest-precedence values, usually from CLI flags or their env vars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub bind: Option<String>,
    pub prompts_dir: Option<PathBuf>,
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_version: Option<String>,
}

pub fn load_service_config(
    paths: &RuntimePaths,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ServiceConfig, ConfigError> {
    let mut config = ServiceConfig::defaults(paths)?;
    if let Some(file) = config_file {
        let file_config = FileConfig::load(&paths.resolve(file)?)?;
        apply_file(&mut config, file_config, paths)?;
    }
    apply_overrides(&mut config, overrides, paths)?;
    config.validate()?;
    Ok(config)
}

fn apply_file(
    config: &mut ServiceConfig,
    file: FileConfig,
    paths: &RuntimePaths,
) -> Result<(), ConfigError> {
    if let Some(path) = file.db_path {
        config.db_path = paths.resolve(&path)?;
    }
    if let Some(bind) = file.bind {
        config.bind = parse_bind(&bind)?;
    }
    if let Some(dir) = file.prompts_dir {
        config.prompts_dir = Some(paths.resolve(&dir)?);
    }
    if let Some(ms) = file.oracle_timeout_ms {
        config.oracle_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.query_timeout_ms {
        config.query_timeout = Duration::from_millis(ms);
    }
    if let Some(rows) = file.preview_rows {
        config.preview_rows = rows;
    }
    if let Some(enforce) = file.enforce_read_only {
        config.enforce_read_only = enforce;
    }
    if let Some(legacy) = file.legacy_column_aliases {
        config.column_policy = if legacy {
            ColumnNamePolicy::Legacy
        } else {
            ColumnNamePolicy::Strict
        };
    }
    if let Some(limit) = file.session_turn_limit {
        config.session_turn_limit = limit;
    }
    if let Some(limit) = file.max_sessions {
        config.max_sessions = limit;
    }
    if let Some(secs) = file.session_idle_secs {
        config.session_idle_ttl = Duration::from_secs(secs);
    }
    if let Some(dialect) = file.db_dialect {
        config.run_defaults.db_dialect = dialect;
    }
    if let Some(rows) = file.max_rows {
        config.run_defaults.max_rows = rows;
    }
    if let Some(retries) = file.max_eval_retries {
        config.run_defaults.max_eval_retries = retries;
    }
    if let Some(retries) = file.max_debug_retries {
        config.run_defaults.max_debug_retries = retries;
    }

    let llm = file.llm;
    if let Some(endpoint) = llm.endpoint {
        config.llm.endpoint = endpoint;
    }
    if llm.api_key.is_some() {
        config.llm.api_key = llm.api_key;
    }
    if let Some(model) = llm.model {
        config.llm.model = model;
    }
    if llm.api_version.is_some() {
        config.llm.api_version = llm.api_version;
    }
    if let Some(temperature) = llm.temperature {
        config.llm.temperature = temperature;
    }
    Ok(())
}

fn apply_overrides(
    config: &mut ServiceConfig,
    overrides: &ConfigOverrides,
    paths: &RuntimePaths,
) -> Result<(), ConfigError> {
    if let Some(path) = &overrides.db_path {
        config.db_path = paths.resolve(path)?;
    }
    if let Some(bind) = &overrides.bind {
        config.bind = parse_bind(bind)?;
    }
    if let Some(dir) = &overrides.prompts_dir {
        config.prompts_dir = Some(paths.resolve(dir)?);
    }
    if let Some(endpoint) = non_empty(&overrides.llm_endpoint) {
        config.llm.endpoint = endpoint;
    }
    if let Some(key) = non_empty(&overrides.llm_api_key) {
        config.llm.api_key = Some(key);
    }
    if let Some(model) = non_empty(&overrides.llm_model) {
        config.llm.model = model;
    }
    if let Some(version) = non_empty(&overrides.llm_api_version) {
        config.llm.api_version = Some(version);
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|source| ConfigError::Bind {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::{ConfigError, ConfigOverrides, RuntimePaths, load_service_config};
    use crate::accessor::ColumnNamePolicy;

    fn paths() -> RuntimePaths {
        RuntimePaths::new(Path::new("/home/tester"), Path::new("/work/repo"))
            .expect("paths should resolve")
    }

    fn temp_config(contents: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("nl2sql-config-{nanos}.json"));
        std::fs::write(&path, contents).expect("config should be written");
        path
    }

    #[test]
    fn defaults_place_the_database_under_home() {
        let config = load_service_config(&paths(), None, &ConfigOverrides::default())
            .expect("defaults should load");
        assert_eq!(config.db_path, Path::new("/home/tester/.nl2sql/nl2sql.db"));
        assert_eq!(config.bind.to_string(), "127.0.0.1:8000");
        assert_eq!(config.column_policy, ColumnNamePolicy::Strict);
        assert!(config.enforce_read_only);
        assert_eq!(config.run_defaults.max_rows, 1000);
    }

    #[test]
    fn file_values_apply_and_overrides_win() {
        let file = temp_config(
            r#"{
                "db_path": "~/sales.db",
                "bind": "0.0.0.0:9000",
                "query_timeout_ms": 1500,
                "legacy_column_aliases": true,
                "max_eval_retries": 1,
                "max_sessions": 50,
                "session_idle_secs": 120,
                "llm": {"model": "from-file", "api_version": "2024-06-01"}
            }"#,
        );
        let overrides = ConfigOverrides {
            llm_model: Some("from-cli".to_string()),
            bind: Some("127.0.0.1:7000".to_string()),
            ..ConfigOverrides::default()
        };

        let config =
            load_service_config(&paths(), Some(&file), &overrides).expect("config should load");
        assert_eq!(config.db_path, Path::new("/home/tester/sales.db"));
        assert_eq!(config.bind.to_string(), "127.0.0.1:7000");
        assert_eq!(config.query_timeout, Duration::from_millis(1500));
        assert_eq!(config.column_policy, ColumnNamePolicy::Legacy);
        assert_eq!(config.run_defaults.max_eval_retries, 1);
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.session_idle_ttl, Duration::from_secs(120));
        assert_eq!(config.llm.model, "from-cli");
        assert_eq!(config.llm.api_version.as_deref(), Some("2024-06-01"));

        let _ = std::fs::remove_file(file);
    }

    #[test]
    fn unknown_file_fields_are_rejected() {
        let file = temp_config(r#"{"max_rowz": 5}"#);
        let err = load_service_config(&paths(), Some(&file), &ConfigOverrides::default())
            .expect_err("typo must be rejected");
        assert!(matches!(err, ConfigError::Parse { .. }), "unexpected: {err}");
        let _ = std::fs::remove_file(file);
    }

    #[test]
    fn zero_timeouts_and_bad_binds_are_rejected() {
        let file = temp_config(r#"{"oracle_timeout_ms": 0}"#);
        let err = load_service_config(&paths(), Some(&file), &ConfigOverrides::default())
            .expect_err("zero timeout must fail");
        assert!(err.to_string().contains("oracle_timeout_ms"));
        let _ = std::fs::remove_file(file);

        let overrides = ConfigOverrides {
            bind: Some("not-an-address".to_string()),
            ..ConfigOverrides::default()
        };
        let err = load_service_config(&paths(), None, &overrides).expect_err("bad bind must fail");
        assert!(matches!(err, ConfigError::Bind { .. }));
    }
}
