use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::roles::Decision;

pub const PIPELINE_RESPONSE_SCHEMA_VERSION: &str = "nl2sql.pipeline-response.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    Classify,
    GroundSchema,
    BuildQuery,
    Evaluate,
    Execute,
    Debug,
    Explain,
}

impl StepName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classify => "Classify",
            Self::GroundSchema => "GroundSchema",
            Self::BuildQuery => "BuildQuery",
            Self::Evaluate => "Evaluate",
            Self::Execute => "Execute",
            Self::Debug => "Debug",
            Self::Explain => "Explain",
        }
    }
}

impl Display for StepName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Ok,
    Failed,
}

impl StepStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
        }
    }
}

/// One audit entry. The log is append-only and ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepName,
    pub attempt: u32,
    pub status: StepStatus,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDebug {
    pub final_sql: Option<String>,
    pub execution_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationPayload {
    pub detailed_explanation: String,
    pub result_summary: String,
    pub followups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Grounding,
    Validation,
    Execution,
    Oracle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Terminal object of a pipeline run, produced by both Respond and Fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub schema_version: String,
    pub run_id: String,
    pub generated_at_utc: String,
    pub decision: Option<Decision>,
    pub reason: String,
    pub action: Vec<String>,
    pub pipeline_log: Vec<StepRecord>,
    pub final_response: String,
    pub sql_debug: SqlDebug,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl PipelineResponse {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    #[must_use]
    pub fn steps(&self, step: StepName) -> impl Iterator<Item = &StepRecord> {
        self.pipeline_log
            .iter()
            .filter(move |record| record.step == step)
    }

    #[must_use]
    pub fn step_count(&self, step: StepName) -> usize {
        self.steps(step).count()
    }
}
