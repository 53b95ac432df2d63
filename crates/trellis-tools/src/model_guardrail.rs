//! Guardrails that put a registry check prompt to a model.

use async_trait::async_trait;
use std::sync::Arc;
use trellis_contract::{Guardrail, ModelExecutor, ModelRequest, PipelineContext, Verdict};
use trellis_registry::GuardrailSpec;

/// One registry guardrail bound to a model. The candidate text is appended
/// to the stored check prompt; the model answers `PASS` or `BLOCK: <reason>`.
/// Anything that is not a clear pass blocks.
pub struct ModelGuardrail {
    spec: GuardrailSpec,
    executor: Arc<dyn ModelExecutor>,
    model: String,
}

impl ModelGuardrail {
    pub fn new(
        spec: GuardrailSpec,
        executor: Arc<dyn ModelExecutor>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            spec,
            executor,
            model: model.into(),
        }
    }

    /// Bind every spec of a pipeline to the same model.
    pub fn from_specs(
        specs: Vec<GuardrailSpec>,
        executor: Arc<dyn ModelExecutor>,
        model: &str,
    ) -> Vec<Arc<dyn Guardrail>> {
        specs
            .into_iter()
            .map(|spec| {
                Arc::new(ModelGuardrail::new(spec, executor.clone(), model)) as Arc<dyn Guardrail>
            })
            .collect()
    }
}

#[async_trait]
impl Guardrail for ModelGuardrail {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn check(&self, candidate: &str, ctx: &PipelineContext) -> Result<Verdict, String> {
        let prompt = format!(
            "{}\n\nCandidate:\n{}\n\nAnswer with PASS if the candidate is acceptable, \
             otherwise answer with BLOCK: <one-line reason>.",
            self.spec.check_prompt, candidate
        );
        let reply = self
            .executor
            .complete(ModelRequest {
                prompt,
                model: self.model.clone(),
                conversation_id: ctx.conversation_id.clone(),
                agent_name: ctx.agent_name.clone(),
                prompt_version: None,
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(parse_verdict(&reply.response))
    }
}

fn parse_verdict(response: &str) -> Verdict {
    let trimmed = response.trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("PASS") {
        return Verdict::Pass;
    }
    let reason = upper
        .starts_with("BLOCK")
        .then(|| trimmed[5..].trim_start_matches(':').trim())
        .filter(|r| !r.is_empty())
        .unwrap_or(trimmed);
    Verdict::Block {
        reason: reason.to_string(),
    }
}
