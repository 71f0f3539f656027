use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::models::Role;

pub const PROMPT_SET_VERSION: &str = "nl2sql.prompts.v1";

const DATE_RULE: &str = "Dates are written as DD/MM/YYYY or DD-MM-YYYY. Never accept or emit any other date format.";

const CLASSIFIER_PROMPT: &str = r#"You route messages for a database question-answering assistant.

Input: `user_message` plus a `context` object with the previous turn (`last_query`, `last_sql`, `last_result_summary`).

Decide:
- CHIT_CHAT: greetings, thanks, small talk, questions about the assistant. Put a short friendly answer in `reply`.
- FOLLOW_UP: the message refers to the previous answer and can be answered from `last_result_summary` alone. Put the answer in `reply`. If fresh data is needed, set `needs_database` to true.
- NL2SQL: anything that needs data from the database.

`reason` is one sentence explaining the decision."#;

const QUERY_BUILDER_PROMPT: &str = r#"You write exactly one read-only SQL query for the given dialect.

Input: `user_query`, `schema_grounding` (the only tables and columns you may use), `context` (previous turn plus `db_dialect` and `max_rows`) and, on retries, `feedback_for_builder` from the reviewer.

Rules:
- A single SELECT (a leading WITH is fine). No data or schema changes.
- Reference only tables and columns listed in `schema_grounding`.
- Add LIMIT `max_rows` unless the query aggregates to a handful of rows.
- Use `?` placeholders and put their values, in order, in `params`.
- The query must be deterministic: add ORDER BY when the order matters.
- When `feedback_for_builder` is present, address every point in it.

`explanation` is one sentence. `assumptions` lists anything you had to guess."#;

const EVALUATOR_PROMPT: &str = r#"You review a candidate SQL query before it runs.

Input: `user_query`, `sql`, `params`, `schema_grounding`, `db_dialect`, `table_row_estimates`.

Check in order:
1. Safety: the statement only reads data.
2. Coverage: it answers the question that was asked.
3. Grounding: every table and column exists in `schema_grounding`.
4. Joins: join keys are plausible and no join fans out rows by accident.
5. Performance: large tables per `table_row_estimates` are filtered or limited.
6. Syntax for `db_dialect`.
7. Date literals and params follow the date rule.

Set `is_valid` to false if any check fails, list the problems in `issues`, and write concrete instructions in `feedback_for_builder`. `score` is your confidence between 0 and 1."#;

const DEBUGGER_PROMPT: &str = r#"You repair a SQL query that failed at execution time.

Input: `sql`, `params`, `execution_error`, `schema_grounding`, `db_dialect`, `table_row_estimates`.

Classify the failure in `problem_type` and explain it in `diagnosis`. Make the smallest edit that fixes the error and return the complete corrected statement as a `fix_instructions` entry with action `modify_sql` and the statement in `replacement`. The fix must stay read-only and must only use grounded tables and columns. `confidence` is between 0 and 1."#;

const EXPLAINER_PROMPT: &str = r#"You explain a query result to the person who asked the question.

Input: `user_query`, `final_sql`, `result_preview` (columns and the first rows), `row_count`, `assumptions`, `execution_time_ms`.

`answer_text` answers the question directly in one or two sentences using the numbers in the preview. `detailed_explanation` describes how the query arrived at the answer in plain words. `result_summary` is one line that a later turn can refer back to. `followups` suggests up to three natural next questions. Do not invent values that are not in the preview."#;

/// Role instructions, one per role, versioned as a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    version: String,
    prompts: BTreeMap<Role, String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    #[must_use]
    pub fn builtin() -> Self {
        let prompts = Role::ALL
            .iter()
            .map(|role| (*role, builtin_prompt(*role).to_string()))
            .collect();
        Self {
            version: PROMPT_SET_VERSION.to_string(),
            prompts,
        }
    }

    /// Replaces built-in prompts with `<role>.md` files found in `dir`.
    /// Roles without a file keep the built-in text.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self> {
        let mut overridden = Vec::new();
        for role in Role::ALL {
            let path = dir.join(format!("{}.md", role.as_str()));
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read prompt override: {}", path.display()))?;
            if text.trim().is_empty() {
                anyhow::bail!("prompt override is empty: {}", path.display());
            }
            self.prompts.insert(role, text.trim().to_string());
            overridden.push(role.as_str());
        }

        if !overridden.is_empty() {
            self.version = format!("{PROMPT_SET_VERSION}+local");
            info!(dir = %dir.display(), roles = ?overridden, "loaded prompt overrides");
        }
        Ok(self)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn prompt(&self, role: Role) -> &str {
        self.prompts
            .get(&role)
            .map_or_else(|| builtin_prompt(role), String::as_str)
    }

    /// Full system message for `role`: the prompt, the date rule and the JSON
    /// schema the reply has to satisfy.
    #[must_use]
    pub fn instructions(&self, role: Role, output_schema: &Value) -> String {
        let schema = serde_json::to_string_pretty(output_schema).unwrap_or_default();
        format!(
            "{}\n\n{DATE_RULE}\n\nReply with exactly one JSON object and nothing else. It must validate against this JSON Schema:\n{schema}",
            self.prompt(role)
        )
    }
}

const fn builtin_prompt(role: Role) -> &'static str {
    match role {
        Role::Classifier => CLASSIFIER_PROMPT,
        Role::QueryBuilder => QUERY_BUILDER_PROMPT,
        Role::Evaluator => EVALUATOR_PROMPT,
        Role::Debugger => DEBUGGER_PROMPT,
        Role::Explainer => EXPLAINER_PROMPT,
    }
}
