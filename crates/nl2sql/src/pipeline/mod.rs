//! Pipeline Orchestrator: the deterministic state machine around the
//! oracle roles.
//!
//! Every accessor and oracle call is recorded in the run's `pipeline_log`
//! before the state advances. Retry counters only grow and exhausting one
//! ends the run.

pub mod grounding;
pub mod guardrail;
pub mod orchestrator;
pub mod run_state;

pub use grounding::{Grounding, select_relevant};
pub use guardrail::{GuardrailViolation, validate_read_only_sql};
pub use orchestrator::{
    DEFAULT_ORACLE_TIMEOUT, DEFAULT_PREVIEW_ROWS, DEFAULT_QUERY_TIMEOUT, Orchestrator,
    OrchestratorSettings,
};
