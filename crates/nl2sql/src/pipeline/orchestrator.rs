use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

use super::grounding::select_relevant;
use super::guardrail::validate_read_only_sql;
use super::run_state::PipelineRun;
use crate::accessor::{QueryOutcome, SchemaAccessor};
use crate::models::{
    ClassifierOutput, DebuggerOutput, Decision, EvaluatorOutput, ExplainerOutput,
    ExplanationPayload, FailureKind, PipelineResponse, QueryBuilderOutput, RoleOutput,
    RunRequest, StepName, StepStatus,
};
use crate::oracle::{CapabilityOracle, OracleError, PromptSet, invoke_role};

pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

const CHIT_CHAT_FALLBACK: &str =
    "Hi! Ask me a question about the data in this database and I will look it up.";
const FOLLOW_UP_FALLBACK: &str = "I do not have an earlier result to refer back to yet.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub oracle_timeout: Duration,
    pub query_timeout: Duration,
    /// Rows handed to the explainer.
    pub preview_rows: usize,
    /// Refuse candidates that are not a single read-only statement even when
    /// the evaluator accepted them.
    pub enforce_read_only: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            enforce_read_only: true,
        }
    }
}

enum State {
    Classify,
    GroundSchema,
    BuildQuery { feedback: Option<String> },
    Evaluate,
    Execute,
    Debug { error: String },
    Explain(QueryOutcome),
    Respond(String),
    Fail(FailureKind, String),
}

/// Drives one question through classification, grounding, query building,
/// evaluation, execution, debugging and explanation.
#[derive(Clone)]
pub struct Orchestrator {
    accessor: Arc<dyn SchemaAccessor>,
    oracle: Arc<dyn CapabilityOracle>,
    prompts: Arc<PromptSet>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        accessor: Arc<dyn SchemaAccessor>,
        oracle: Arc<dyn CapabilityOracle>,
        prompts: Arc<PromptSet>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            accessor,
            oracle,
            prompts,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn run(&self, request: RunRequest) -> PipelineResponse {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.drive(&request, run_id).instrument(span).await
    }

    async fn drive(&self, request: &RunRequest, run_id: String) -> PipelineResponse {
        let mut run = PipelineRun::new(request, run_id);
        let mut state = State::Classify;
        loop {
            state = match state {
                State::Classify => self.classify(&mut run).await,
                State::GroundSchema => self.ground_schema(&mut run).await,
                State::BuildQuery { feedback } => self.build_query(&mut run, feedback).await,
                State::Evaluate => self.evaluate(&mut run).await,
                State::Execute => self.execute(&mut run).await,
                State::Debug { error } => self.debug(&mut run, error).await,
                State::Explain(outcome) => self.explain(&mut run, outcome).await,
                State::Respond(final_response) => return run.respond(final_response),
                State::Fail(kind, message) => return run.fail(kind, message),
            };
        }
    }

    async fn call<T: RoleOutput>(&self, input: &Value) -> Result<T, OracleError> {
        invoke_role::<T>(
            self.oracle.as_ref(),
            &self.prompts,
            input,
            self.settings.oracle_timeout,
        )
        .await
    }

    async fn classify(&self, run: &mut PipelineRun<'_>) -> State {
        let started = Instant::now();
        let input = json!({
            "user_message": run.request.user_message,
            "context": run.request.context,
        });

        let output = match self.call::<ClassifierOutput>(&input).await {
            Ok(output) => output,
            Err(error) => {
                run.record(
                    StepName::Classify,
                    StepStatus::Failed,
                    input,
                    error_output(&error),
                    started,
                );
                return State::Fail(FailureKind::Oracle, format!("classification failed: {error}"));
            }
        };

        let decision = output.effective_decision();
        run.decision = Some(decision);
        run.reason = output.reason.clone();
        run.record(
            StepName::Classify,
            StepStatus::Ok,
            input,
            to_output(&output),
            started,
        );

        match decision {
            Decision::Nl2Sql => State::GroundSchema,
            Decision::ChitChat => State::Respond(non_blank(output.reply, CHIT_CHAT_FALLBACK)),
            Decision::FollowUp => {
                let summary = run.request.context.last_result_summary.trim();
                let fallback = if summary.is_empty() {
                    FOLLOW_UP_FALLBACK
                } else {
                    summary
                };
                State::Respond(non_blank(output.reply, fallback))
            }
        }
    }

    async fn ground_schema(&self, run: &mut PipelineRun<'_>) -> State {
        let started = Instant::now();
        let input = json!({
            "user_message": run.request.user_message,
            "last_query": run.request.context.last_query,
        });

        let catalog = self.accessor.fetch_schema().await;
        if catalog.is_empty() {
            run.record(
                StepName::GroundSchema,
                StepStatus::Failed,
                input,
                json!({"table_descriptions": 0, "table_columns": 0}),
                started,
            );
            return State::Fail(
                FailureKind::Grounding,
                "schema metadata is empty: no table descriptions or columns found".to_string(),
            );
        }

        let grounding = select_relevant(&catalog, &run.request.user_message, &run.request.context);
        let tables = grounding.catalog.table_names().into_iter().collect::<Vec<_>>();
        run.row_estimates = self.accessor.table_row_estimates(&tables).await;
        run.record(
            StepName::GroundSchema,
            StepStatus::Ok,
            input,
            json!({
                "tables": tables,
                "matched_tables": grounding.matched_tables,
                "full_catalog": grounding.full_catalog,
                "column_count": grounding.catalog.table_columns.len(),
                "table_row_estimates": run.row_estimates,
            }),
            started,
        );
        run.grounding = Some(grounding);
        State::BuildQuery { feedback: None }
    }

    async fn build_query(&self, run: &mut PipelineRun<'_>, feedback: Option<String>) -> State {
        let started = Instant::now();
        let request = run.request;
        let mut input = json!({
            "user_query": request.user_message,
            "schema_grounding": run.schema_grounding(),
            "context": {
                "last_query": request.context.last_query,
                "last_sql": request.context.last_sql,
                "last_result_summary": request.context.last_result_summary,
                "db_dialect": request.config.db_dialect,
                "max_rows": request.config.max_rows,
            },
        });
        if let Some(feedback) = feedback {
            input["feedback_for_builder"] = Value::String(feedback);
        }

        match self.call::<QueryBuilderOutput>(&input).await {
            Ok(output) => {
                run.record(
                    StepName::BuildQuery,
                    StepStatus::Ok,
                    input,
                    to_output(&output),
                    started,
                );
                run.candidate = Some(output);
                State::Evaluate
            }
            Err(error) => {
                run.record(
                    StepName::BuildQuery,
                    StepStatus::Failed,
                    input,
                    error_output(&error),
                    started,
                );
                if run.eval_budget_left() {
                    run.eval_retry_count += 1;
                    State::BuildQuery {
                        feedback: Some(format!(
                            "Your previous reply could not be used: {error}. Reply with one JSON object that matches the schema."
                        )),
                    }
                } else {
                    State::Fail(
                        FailureKind::Oracle,
                        format!("evaluation retries exhausted: {error}"),
                    )
                }
            }
        }
    }

    async fn evaluate(&self, run: &mut PipelineRun<'_>) -> State {
        let started = Instant::now();
        let Some(candidate) = run.candidate.clone() else {
            return State::Fail(
                FailureKind::Validation,
                "no candidate SQL to evaluate".to_string(),
            );
        };
        let input = json!({
            "user_query": run.request.user_message,
            "sql": candidate.sql,
            "params": candidate.params,
            "schema_grounding": run.schema_grounding(),
            "db_dialect": run.request.config.db_dialect,
            "table_row_estimates": run.row_estimates,
        });

        let mut verdict = match self.call::<EvaluatorOutput>(&input).await {
            Ok(verdict) => verdict,
            Err(error) => {
                run.record(
                    StepName::Evaluate,
                    StepStatus::Failed,
                    input,
                    error_output(&error),
                    started,
                );
                if run.eval_budget_left() {
                    run.eval_retry_count += 1;
                    return State::Evaluate;
                }
                return State::Fail(
                    FailureKind::Oracle,
                    format!("evaluation retries exhausted: {error}"),
                );
            }
        };

        let mut output = to_output(&verdict);
        if self.settings.enforce_read_only
            && let Err(violation) = validate_read_only_sql(&candidate.sql)
        {
            verdict.is_valid = false;
            verdict.issues.push(violation.message.clone());
            verdict.feedback_for_builder = join_feedback(
                &verdict.feedback_for_builder,
                &format!(
                    "{} Write a single SELECT (or WITH ... SELECT) statement.",
                    violation.message
                ),
            );
            output = to_output(&verdict);
            output["guardrail"] = violation.details;
        }
        run.record(StepName::Evaluate, StepStatus::Ok, input, output, started);

        if verdict.is_valid {
            return State::Execute;
        }
        if run.eval_budget_left() {
            run.eval_retry_count += 1;
            let feedback = if verdict.feedback_for_builder.trim().is_empty() {
                verdict.issues.join("; ")
            } else {
                verdict.feedback_for_builder
            };
            return State::BuildQuery {
                feedback: Some(feedback),
            };
        }
        State::Fail(
            FailureKind::Validation,
            format!(
                "evaluation retries exhausted after {} attempts: {}",
                run.attempts(StepName::Evaluate),
                verdict.issues.join("; ")
            ),
        )
    }

    async fn execute(&self, run: &mut PipelineRun<'_>) -> State {
        let started = Instant::now();
        let sql = run.candidate_sql().unwrap_or_default().to_string();
        let params = run.candidate_params().to_vec();
        let input = json!({"sql": sql, "params": params});

        let outcome = self
            .accessor
            .execute_query(&sql, &params, self.settings.query_timeout)
            .await;
        let status = if outcome.success {
            StepStatus::Ok
        } else {
            StepStatus::Failed
        };
        run.record(
            StepName::Execute,
            status,
            input,
            json!({
                "success": outcome.success,
                "columns": outcome.columns,
                "row_count": outcome.row_count,
                "error": outcome.error,
                "duration_ms": outcome.duration_ms,
            }),
            started,
        );

        if outcome.success {
            run.keep_result(&outcome);
            return State::Explain(outcome);
        }

        let error = outcome
            .error
            .unwrap_or_else(|| "query failed without an error message".to_string());
        run.last_error = Some(error.clone());
        if run.debug_budget_left() {
            State::Debug { error }
        } else {
            warn!(run_id = %run.run_id, %error, "debug retries exhausted");
            State::Fail(FailureKind::Execution, error)
        }
    }

    async fn debug(&self, run: &mut PipelineRun<'_>, error: String) -> State {
        let started = Instant::now();
        run.debug_retry_count += 1;
        let input = json!({
            "sql": run.candidate_sql(),
            "params": run.candidate_params(),
            "execution_error": error,
            "schema_grounding": run.schema_grounding(),
            "db_dialect": run.request.config.db_dialect,
            "table_row_estimates": run.row_estimates,
        });

        let output = match self.call::<DebuggerOutput>(&input).await {
            Ok(output) => output,
            Err(oracle_error) => {
                run.record(
                    StepName::Debug,
                    StepStatus::Failed,
                    input,
                    error_output(&oracle_error),
                    started,
                );
                return State::Fail(
                    FailureKind::Oracle,
                    format!("debugging failed: {oracle_error}"),
                );
            }
        };

        let replacement = output.replacement_sql().map(str::to_string);
        run.record(
            StepName::Debug,
            StepStatus::Ok,
            input,
            to_output(&output),
            started,
        );

        match (replacement, run.candidate.as_mut()) {
            (Some(sql), Some(candidate)) => {
                candidate.sql = sql;
                State::Evaluate
            }
            _ => State::Fail(
                FailureKind::Execution,
                format!("no SQL fix was proposed for: {error}"),
            ),
        }
    }

    async fn explain(&self, run: &mut PipelineRun<'_>, outcome: QueryOutcome) -> State {
        let started = Instant::now();
        let preview = outcome
            .rows
            .iter()
            .take(self.settings.preview_rows)
            .cloned()
            .collect::<Vec<_>>();
        let assumptions = run
            .candidate
            .as_ref()
            .map(|candidate| candidate.assumptions.clone())
            .unwrap_or_default();
        let input = json!({
            "user_query": run.request.user_message,
            "final_sql": run.candidate_sql(),
            "result_preview": {
                "columns": outcome.columns,
                "rows": preview,
            },
            "row_count": outcome.row_count,
            "assumptions": assumptions,
            "execution_time_ms": outcome.duration_ms,
        });

        match self.call::<ExplainerOutput>(&input).await {
            Ok(output) => {
                run.record(
                    StepName::Explain,
                    StepStatus::Ok,
                    input,
                    to_output(&output),
                    started,
                );
                run.explanation = Some(ExplanationPayload {
                    detailed_explanation: output.detailed_explanation,
                    result_summary: output.result_summary,
                    followups: output.followups,
                });
                State::Respond(output.answer_text)
            }
            Err(error) => {
                run.record(
                    StepName::Explain,
                    StepStatus::Failed,
                    input,
                    error_output(&error),
                    started,
                );
                State::Fail(FailureKind::Oracle, format!("explanation failed: {error}"))
            }
        }
    }
}

fn to_output<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn error_output(error: &OracleError) -> Value {
    json!({"error": error.to_string()})
}

fn non_blank(text: Option<String>, fallback: &str) -> String {
    text.filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn join_feedback(existing: &str, extra: &str) -> String {
    if existing.trim().is_empty() {
        extra.to_string()
    } else {
        format!("{} {extra}", existing.trim())
    }
}
