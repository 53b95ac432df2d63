//! Guardrail SPI and the guard stage.

use crate::context::PipelineContext;
use crate::stage::{Stage, StageVerdict};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of one guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Block { reason: String },
}

/// A policy check over a rendered candidate. Implementations are read-only
/// and shared across in-flight messages.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` means the check itself could not run, which is a stage failure,
    /// not a block.
    async fn check(&self, candidate: &str, ctx: &PipelineContext) -> Result<Verdict, String>;
}

/// Run the guardrails in declaration order over `render(value)`. The first
/// block replaces the outcome with `Rejected`; all passes are transparent.
/// An empty guard list is the identity stage.
pub fn guard_stage<B>(
    guards: Vec<Arc<dyn Guardrail>>,
    render: impl Fn(&B) -> String + Send + Sync + 'static,
) -> Stage<B, B>
where
    B: Send + 'static,
{
    if guards.is_empty() {
        return Stage::identity();
    }
    let guards = Arc::new(guards);
    let render = Arc::new(render);
    Stage::instrument("guardrails", move |value: B, ctx| {
        let guards = guards.clone();
        let render = render.clone();
        Box::pin(async move {
            let candidate = render(&value);
            for guard in guards.iter() {
                match guard.check(&candidate, &ctx).await {
                    Ok(Verdict::Pass) => {}
                    Ok(Verdict::Block { reason }) => {
                        return (
                            StageVerdict::Reject {
                                guardrail: guard.name().to_string(),
                                reason,
                            },
                            0,
                        );
                    }
                    Err(error) => {
                        return (
                            StageVerdict::Fail(format!(
                                "guardrail {} check failed: {error}",
                                guard.name()
                            )),
                            0,
                        );
                    }
                }
            }
            (StageVerdict::Ok(value), 0)
        })
    })
}
