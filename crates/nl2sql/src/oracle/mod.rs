//! Capability Oracle: the black-box LLM behind every role.
//!
//! The pipeline only ever talks to [`CapabilityOracle`]. Replies are decoded
//! into the role's output type by [`invoke_role`], so a reply that does not
//! fit its contract surfaces as an [`OracleError`] and never as a panic.

pub mod chat;
pub mod parse;
pub mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Role, RoleOutput, output_schema};

pub use chat::{ChatCompletionsConfig, ChatCompletionsOracle};
pub use parse::extract_json_object;
pub use prompts::{PROMPT_SET_VERSION, PromptSet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle call exceeded {0} ms")]
    Timeout(u128),

    #[error("oracle returned an empty reply")]
    EmptyResponse,

    #[error("oracle reply is not a JSON object: {0}")]
    MalformedOutput(String),

    #[error("{role} reply does not match its output contract: {detail}")]
    SchemaMismatch { role: Role, detail: String },
}

#[async_trait]
pub trait CapabilityOracle: Send + Sync {
    /// Sends `instructions` plus the role's JSON `input` and returns the
    /// JSON object the model replied with.
    async fn invoke(&self, role: Role, instructions: &str, input: &Value)
    -> Result<Value, OracleError>;
}

/// Calls the oracle for `T::ROLE` and decodes the reply into `T`.
pub async fn invoke_role<T: RoleOutput>(
    oracle: &dyn CapabilityOracle,
    prompts: &PromptSet,
    input: &Value,
    timeout: Duration,
) -> Result<T, OracleError> {
    let instructions = prompts.instructions(T::ROLE, &output_schema::<T>());
    let reply = tokio::time::timeout(timeout, oracle.invoke(T::ROLE, &instructions, input))
        .await
        .map_err(|_| OracleError::Timeout(timeout.as_millis()))??;

    let output = serde_json::from_value::<T>(reply).map_err(|error| {
        OracleError::SchemaMismatch {
            role: T::ROLE,
            detail: error.to_string(),
        }
    })?;
    output
        .validate()
        .map_err(|detail| OracleError::SchemaMismatch {
            role: T::ROLE,
            detail,
        })?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::{CapabilityOracle, OracleError, PromptSet, invoke_role};
    use crate::models::{EvaluatorOutput, Role};

    struct FixedOracle(Value);

    #[async_trait]
    impl CapabilityOracle for FixedOracle {
        async fn invoke(
            &self,
            _role: Role,
            _instructions: &str,
            _input: &Value,
        ) -> Result<Value, OracleError> {
            Ok(self.0.clone())
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl CapabilityOracle for SlowOracle {
        async fn invoke(
            &self,
            _role: Role,
            _instructions: &str,
            _input: &Value,
        ) -> Result<Value, OracleError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn reply_is_decoded_into_the_role_type() {
        let oracle = FixedOracle(json!({"is_valid": true, "score": 0.9}));
        let output: EvaluatorOutput = invoke_role(
            &oracle,
            &PromptSet::builtin(),
            &json!({}),
            Duration::from_secs(1),
        )
        .await
        .expect("valid reply should decode");
        assert!(output.is_valid);
    }

    #[tokio::test]
    async fn out_of_contract_reply_is_a_schema_mismatch() {
        let oracle = FixedOracle(json!({"is_valid": true, "score": 7.0}));
        let error = invoke_role::<EvaluatorOutput>(
            &oracle,
            &PromptSet::builtin(),
            &json!({}),
            Duration::from_secs(1),
        )
        .await
        .expect_err("score outside 0..=1 must be rejected");
        assert!(matches!(
            error,
            OracleError::SchemaMismatch {
                role: Role::Evaluator,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_oracle_times_out() {
        let error = invoke_role::<EvaluatorOutput>(
            &SlowOracle,
            &PromptSet::builtin(),
            &json!({}),
            Duration::from_millis(20),
        )
        .await
        .expect_err("slow oracle must time out");
        assert_eq!(error, OracleError::Timeout(20));
    }
}
