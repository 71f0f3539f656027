use std::fmt::{Display, Formatter};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The oracle roles invoked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Classifier,
    QueryBuilder,
    Evaluator,
    Debugger,
    Explainer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Classifier,
        Role::QueryBuilder,
        Role::Evaluator,
        Role::Debugger,
        Role::Explainer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::QueryBuilder => "query_builder",
            Self::Evaluator => "evaluator",
            Self::Debugger => "debugger",
            Self::Explainer => "explainer",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Decision {
    #[serde(rename = "CHIT_CHAT")]
    #[schemars(rename = "CHIT_CHAT")]
    ChitChat,
    #[serde(rename = "FOLLOW_UP")]
    #[schemars(rename = "FOLLOW_UP")]
    FollowUp,
    #[serde(rename = "NL2SQL")]
    #[schemars(rename = "NL2SQL")]
    Nl2Sql,
}

impl Decision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChitChat => "CHIT_CHAT",
            Self::FollowUp => "FOLLOW_UP",
            Self::Nl2Sql => "NL2SQL",
        }
    }
}

/// Typed contract for one role's answer. Deserialization enforces the shape,
/// `validate` enforces what serde cannot express.
pub trait RoleOutput: DeserializeOwned + Serialize + JsonSchema + Send {
    const ROLE: Role;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifierOutput {
    pub decision: Decision,
    pub reason: String,

    /// Set for FOLLOW_UP turns that cannot be answered from the prior result.
    #[serde(default)]
    pub needs_database: bool,

    /// Conversational answer for turns that do not touch the database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl RoleOutput for ClassifierOutput {
    const ROLE: Role = Role::Classifier;
}

impl ClassifierOutput {
    /// FOLLOW_UP turns that need fresh data run the full NL2SQL pipeline.
    #[must_use]
    pub fn effective_decision(&self) -> Decision {
        match self.decision {
            Decision::FollowUp if self.needs_database => Decision::Nl2Sql,
            decision => decision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryBuilderOutput {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl RoleOutput for QueryBuilderOutput {
    const ROLE: Role = Role::QueryBuilder;

    fn validate(&self) -> Result<(), String> {
        if self.sql.trim().is_empty() {
            return Err("query builder returned an empty `sql` field".to_string());
        }
        if self
            .params
            .iter()
            .any(|param| param.is_array() || param.is_object())
        {
            return Err("query builder `params` entries must be scalar JSON values".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluatorOutput {
    pub is_valid: bool,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub feedback_for_builder: String,
}

impl RoleOutput for EvaluatorOutput {
    const ROLE: Role = Role::Evaluator;

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.score) {
            return Err(format!("evaluator score {} is outside 0.0..=1.0", self.score));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProblemType {
    Syntax,
    Performance,
    MissingJoin,
    MissingColumn,
    Permission,
    Other,
}

pub const MODIFY_SQL_ACTION: &str = "modify_sql";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FixInstruction {
    /// `modify_sql` carries a full replacement statement.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DebuggerOutput {
    pub problem_type: ProblemType,
    pub diagnosis: String,
    #[serde(default)]
    pub fix_instructions: Vec<FixInstruction>,
    #[serde(default)]
    pub confidence: f64,
}

impl RoleOutput for DebuggerOutput {
    const ROLE: Role = Role::Debugger;
}

impl DebuggerOutput {
    /// The first non-empty `modify_sql` replacement, which becomes the new
    /// candidate statement.
    #[must_use]
    pub fn replacement_sql(&self) -> Option<&str> {
        self.fix_instructions
            .iter()
            .filter(|instruction| instruction.action == MODIFY_SQL_ACTION)
            .filter_map(|instruction| instruction.replacement.as_deref())
            .map(str::trim)
            .find(|replacement| !replacement.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExplainerOutput {
    pub answer_text: String,
    #[serde(default)]
    pub detailed_explanation: String,
    #[serde(default)]
    pub result_summary: String,
    #[serde(default)]
    pub followups: Vec<String>,
}

impl RoleOutput for ExplainerOutput {
    const ROLE: Role = Role::Explainer;

    fn validate(&self) -> Result<(), String> {
        if self.answer_text.trim().is_empty() {
            return Err("explainer returned an empty `answer_text`".to_string());
        }
        Ok(())
    }
}

/// JSON schema advertised to the oracle for `T`.
#[must_use]
pub fn output_schema<T: RoleOutput>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}
