//! External tool implementations for trellis agents: the genai-backed model
//! client, the subprocess executor, and model-backed guardrails.

pub mod model;
pub mod model_guardrail;
pub mod subprocess;

pub use model::GenaiModel;
pub use model_guardrail::ModelGuardrail;
pub use subprocess::{CodeOutput, CodeRequest, SubprocessExecutor, SUBPROCESS_TOOL_NAME};
