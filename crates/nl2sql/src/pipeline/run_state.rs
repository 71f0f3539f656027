use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{Value, json};
use tracing::info;

use super::grounding::Grounding;
use crate::accessor::QueryOutcome;
use crate::models::{
    Decision, ExplanationPayload, Failure, FailureKind, PIPELINE_RESPONSE_SCHEMA_VERSION,
    PipelineResponse, QueryBuilderOutput, ResultPayload, RunRequest, SqlDebug, StepName,
    StepRecord, StepStatus,
};
use crate::utils::time::{elapsed_ms, now_utc_rfc3339};

/// Mutable bookkeeping for one run: the audit log, retry counters and the
/// current candidate. Only the orchestrator writes to it.
#[derive(Debug)]
pub struct PipelineRun<'a> {
    pub request: &'a RunRequest,
    pub run_id: String,
    pub log: Vec<StepRecord>,
    pub decision: Option<Decision>,
    pub reason: String,
    pub grounding: Option<Grounding>,
    pub row_estimates: BTreeMap<String, u64>,
    pub candidate: Option<QueryBuilderOutput>,
    pub eval_retry_count: u32,
    pub debug_retry_count: u32,
    pub last_error: Option<String>,
    pub result: Option<ResultPayload>,
    pub explanation: Option<ExplanationPayload>,
}

impl<'a> PipelineRun<'a> {
    pub fn new(request: &'a RunRequest, run_id: String) -> Self {
        Self {
            request,
            run_id,
            log: Vec::new(),
            decision: None,
            reason: String::new(),
            grounding: None,
            row_estimates: BTreeMap::new(),
            candidate: None,
            eval_retry_count: 0,
            debug_retry_count: 0,
            last_error: None,
            result: None,
            explanation: None,
        }
    }

    pub fn record(
        &mut self,
        step: StepName,
        status: StepStatus,
        input: Value,
        output: Value,
        started: Instant,
    ) {
        let attempt = self.attempts(step) + 1;
        let duration_ms = elapsed_ms(started);
        info!(
            run_id = %self.run_id,
            step = step.as_str(),
            attempt,
            status = status.as_str(),
            duration_ms,
            "pipeline step"
        );
        self.log.push(StepRecord {
            step,
            attempt,
            status,
            input,
            output,
            duration_ms,
        });
    }

    #[must_use]
    pub fn attempts(&self, step: StepName) -> u32 {
        let count = self
            .log
            .iter()
            .filter(|record| record.step == step)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// `schema_grounding` as sent to the query roles.
    #[must_use]
    pub fn schema_grounding(&self) -> Value {
        self.grounding
            .as_ref()
            .and_then(|grounding| serde_json::to_value(&grounding.catalog).ok())
            .unwrap_or_else(|| json!({"table_descriptions": [], "table_columns": []}))
    }

    #[must_use]
    pub fn candidate_sql(&self) -> Option<&str> {
        self.candidate.as_ref().map(|candidate| candidate.sql.as_str())
    }

    #[must_use]
    pub fn candidate_params(&self) -> &[Value] {
        self.candidate
            .as_ref()
            .map(|candidate| candidate.params.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn eval_budget_left(&self) -> bool {
        self.eval_retry_count < self.request.config.max_eval_retries
    }

    #[must_use]
    pub fn debug_budget_left(&self) -> bool {
        self.debug_retry_count < self.request.config.max_debug_retries
    }

    /// Keeps at most `max_rows` rows of a successful execution.
    pub fn keep_result(&mut self, outcome: &QueryOutcome) {
        let max_rows = self.request.config.max_rows;
        self.result = Some(ResultPayload {
            columns: outcome.columns.clone(),
            rows: outcome.rows.iter().take(max_rows).cloned().collect(),
            row_count: outcome.row_count,
            truncated: outcome.row_count > max_rows,
        });
    }

    fn action(&self, terminal: &str) -> Vec<String> {
        self.log
            .iter()
            .map(|record| record.step.as_str().to_string())
            .chain(std::iter::once(terminal.to_string()))
            .collect()
    }

    pub fn respond(self, final_response: String) -> PipelineResponse {
        let sql_debug = SqlDebug {
            final_sql: self.result.as_ref().and(self.candidate_sql().map(str::to_string)),
            execution_error: None,
        };
        info!(run_id = %self.run_id, steps = self.log.len(), "pipeline responded");
        PipelineResponse {
            schema_version: PIPELINE_RESPONSE_SCHEMA_VERSION.to_string(),
            generated_at_utc: now_utc_rfc3339(),
            decision: self.decision,
            reason: self.reason.clone(),
            action: self.action("Respond"),
            final_response,
            sql_debug,
            result: self.result,
            explanation: self.explanation,
            failure: None,
            pipeline_log: self.log,
            run_id: self.run_id,
        }
    }

    pub fn fail(self, kind: FailureKind, message: String) -> PipelineResponse {
        let sql_debug = SqlDebug {
            final_sql: self.candidate_sql().map(str::to_string),
            execution_error: self.last_error.clone(),
        };
        info!(
            run_id = %self.run_id,
            steps = self.log.len(),
            kind = ?kind,
            %message,
            "pipeline failed"
        );
        let reason = if self.reason.is_empty() {
            message.clone()
        } else {
            self.reason.clone()
        };
        PipelineResponse {
            schema_version: PIPELINE_RESPONSE_SCHEMA_VERSION.to_string(),
            generated_at_utc: now_utc_rfc3339(),
            decision: self.decision,
            reason,
            action: self.action("Fail"),
            final_response: failure_text(kind, &message),
            sql_debug,
            result: self.result,
            explanation: self.explanation,
            failure: Some(Failure { kind, message }),
            pipeline_log: self.log,
            run_id: self.run_id,
        }
    }
}

fn failure_text(kind: FailureKind, message: &str) -> String {
    match kind {
        FailureKind::Grounding => {
            "I could not find any table metadata in the database, so I cannot answer questions about it yet.".to_string()
        }
        FailureKind::Validation => format!(
            "I could not produce a query that passed validation for that question ({message})."
        ),
        FailureKind::Execution => format!("The query could not be run successfully: {message}"),
        FailureKind::Oracle => format!(
            "The language model returned an answer I could not use ({message}). Please try again."
        ),
    }
}
