pub mod command_envelope;
pub mod response;
pub mod roles;
pub mod run;
pub mod schema_catalog;

pub use command_envelope::{
    COMMAND_ENVELOPE_SCHEMA_VERSION, CommandEnvelope, CommandEnvelopeError, CommandFailure,
};
pub use response::{
    ExplanationPayload, Failure, FailureKind, PIPELINE_RESPONSE_SCHEMA_VERSION, PipelineResponse,
    ResultPayload, SqlDebug, StepName, StepRecord, StepStatus,
};
pub use roles::{
    ClassifierOutput, DebuggerOutput, Decision, EvaluatorOutput, ExplainerOutput, FixInstruction,
    ProblemType, QueryBuilderOutput, Role, RoleOutput, output_schema,
};
pub use run::{RunConfig, RunRequest, TurnContext};
pub use schema_catalog::{ColumnDescriptor, SchemaCatalog, TableDescriptor};
