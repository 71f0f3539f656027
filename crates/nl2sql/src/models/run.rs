use serde::{Deserialize, Serialize};

pub const DEFAULT_DB_DIALECT: &str = "sqlite";
pub const DEFAULT_MAX_ROWS: usize = 1_000;
pub const DEFAULT_MAX_EVAL_RETRIES: u32 = 3;
pub const DEFAULT_MAX_DEBUG_RETRIES: u32 = 3;

/// Per-run knobs supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub db_dialect: String,
    pub max_rows: usize,
    pub max_eval_retries: u32,
    pub max_debug_retries: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            db_dialect: DEFAULT_DB_DIALECT.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            max_eval_retries: DEFAULT_MAX_EVAL_RETRIES,
            max_debug_retries: DEFAULT_MAX_DEBUG_RETRIES,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.db_dialect.trim().is_empty() {
            return Err("db_dialect must not be empty".to_string());
        }
        if self.max_rows == 0 {
            return Err("max_rows must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// What the previous turn of the conversation left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContext {
    #[serde(default)]
    pub last_query: String,
    #[serde(default)]
    pub last_sql: String,
    #[serde(default)]
    pub last_result_summary: String,
}

impl TurnContext {
    /// Fields left blank here are taken from `fallback`.
    #[must_use]
    pub fn or_else(self, fallback: &TurnContext) -> Self {
        fn pick(value: String, fallback: &str) -> String {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value
            }
        }

        Self {
            last_query: pick(self.last_query, &fallback.last_query),
            last_sql: pick(self.last_sql, &fallback.last_sql),
            last_result_summary: pick(self.last_result_summary, &fallback.last_result_summary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub user_message: String,
    pub context: TurnContext,
    pub config: RunConfig,
}

#[cfg(test)]
mod tests {
    use super::{RunConfig, TurnContext};

    #[test]
    fn blank_context_fields_fall_back_to_thread_values() {
        let thread = TurnContext {
            last_query: "sales by month".to_string(),
            last_sql: "SELECT 1".to_string(),
            last_result_summary: "12 rows".to_string(),
        };
        let request = TurnContext {
            last_query: "sales by week".to_string(),
            last_sql: String::new(),
            last_result_summary: "  ".to_string(),
        };

        let merged = request.or_else(&thread);
        assert_eq!(merged.last_query, "sales by week");
        assert_eq!(merged.last_sql, "SELECT 1");
        assert_eq!(merged.last_result_summary, "12 rows");
    }

    #[test]
    fn zero_max_rows_is_rejected() {
        let config = RunConfig {
            max_rows: 0,
            ..RunConfig::default()
        };
        let err = config.validate().expect_err("zero rows must fail");
        assert!(err.contains("max_rows"), "unexpected error: {err}");
    }
}
