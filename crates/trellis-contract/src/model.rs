//! Provider-neutral model execution contract consumed by model-backed stages.

use async_trait::async_trait;
use thiserror::Error;

/// One blocking text-in/text-out model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub model: String,
    /// Conversation the call belongs to, for observability records.
    pub conversation_id: String,
    /// Agent issuing the call.
    pub agent_name: String,
    /// Registry version of the prompt template behind this call, when one
    /// was used. Carried onto the model-call record so usage can be broken
    /// down per prompt version.
    pub prompt_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub response: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model call failed: {0}")]
    Call(String),
}

/// Text-in/text-out model interface. Calls block the owning per-message task
/// only, never the consumer loop.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError>;

    /// Stable executor label for debug output.
    fn name(&self) -> &'static str {
        "model_executor"
    }
}
