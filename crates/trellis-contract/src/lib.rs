//! Core contracts for trellis agent pipelines: the outcome algebra, the
//! per-message context, composable stages and processes, the envelope wire
//! format, guardrail/tool/model SPIs, and the agent builder.

pub mod agent;
pub mod context;
pub mod envelope;
pub mod guardrail;
pub mod inbound;
pub mod model;
pub mod outcome;
pub mod process;
pub mod stage;
pub mod stream;
pub mod tool;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// agent
pub use agent::{AgentBuilder, AgentDefinition, InputBound, OutputBinding, PipelineBound};

// context
pub use context::{NoopObserver, PipelineContext, StageLog, StageObserver, StageState};

// envelope
pub use envelope::{
    decode_payload, encode_payload, DecodeError, Envelope, PayloadType, UpstreamFailure,
    UpstreamRejection,
};

// guardrail
pub use guardrail::{guard_stage, Guardrail, Verdict};

// inbound
pub use inbound::{expect_normal, handle_upstream, Inbound};

// model
pub use model::{ModelError, ModelExecutor, ModelReply, ModelRequest};

// outcome
pub use outcome::Outcome;

// process
pub use process::{MaxReflections, Process, Reflection, ReflectionBoundError, REFLECTION_BOUND};

// stage
pub use stage::Stage;

// stream
pub use stream::{agent_of_stream, task_stream};

// tool
pub use tool::{Tool, ToolResult, ToolStatus};
