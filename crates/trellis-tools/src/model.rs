//! Default model executor backed by `genai::Client`.

use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatRequest};
use genai::Client;
use std::time::Instant;
use trellis_contract::{ModelError, ModelExecutor, ModelReply, ModelRequest};
use trellis_runtime::{JsonlSink, LogLevel, LogRecord, LogSource};

/// `ModelExecutor` over one blocking `exec_chat` call. When a sink is
/// attached, every successful call emits an LLM-source record carrying the
/// prompt, response, model identity, and latency.
pub struct GenaiModel {
    client: Client,
    sink: Option<JsonlSink>,
}

impl GenaiModel {
    pub fn new(client: Client) -> Self {
        Self { client, sink: None }
    }

    /// Use the ambient provider configuration (API keys from env).
    pub fn from_env() -> Self {
        Self::new(Client::default())
    }

    #[must_use]
    pub fn with_sink(mut self, sink: JsonlSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[async_trait]
impl ModelExecutor for GenaiModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let chat_request = ChatRequest::new(vec![ChatMessage::user(&request.prompt)]);
        let started = Instant::now();
        let response = self
            .client
            .exec_chat(&request.model, chat_request, None)
            .await
            .map_err(|e| ModelError::Call(e.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let input_tokens = response.usage.prompt_tokens;
        let output_tokens = response.usage.completion_tokens;
        let text = response
            .content_text_as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::Call("model returned no text content".to_string()))?;

        if let Some(sink) = &self.sink {
            let mut record = LogRecord::now(
                "llm_call",
                &request.conversation_id,
                LogLevel::Info,
                LogSource::Llm,
                format!(
                    "{} called {} ({} prompt chars, {} response chars)",
                    request.agent_name,
                    request.model,
                    request.prompt.len(),
                    text.len()
                ),
            )
            .with_agent(&request.agent_name)
            .with_model_call(&request.prompt, &text, &request.model, latency_ms)
            .with_token_usage(
                input_tokens.map(|t| t.max(0) as u64),
                output_tokens.map(|t| t.max(0) as u64),
            );
            if let Some(version) = &request.prompt_version {
                record = record.with_prompt_version(version);
            }
            sink.emit(record);
        }

        Ok(ModelReply {
            response: text,
            latency_ms,
        })
    }

    fn name(&self) -> &'static str {
        "genai_model"
    }
}
