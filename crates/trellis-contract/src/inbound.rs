//! Typed edge decode of upstream outcomes, and the propagation primitives
//! that turn an `Inbound`-headed pipeline out of an ordinary one.

use crate::envelope::{UpstreamFailure, UpstreamRejection};
use crate::outcome::Outcome;
use crate::stage::Stage;
use std::sync::Arc;

/// What actually arrived at the agent edge: a normal payload, or the typed
/// record of an upstream failure or rejection.
#[derive(Debug, Clone)]
pub enum Inbound<T> {
    Normal(T),
    Failure(UpstreamFailure),
    Rejection(UpstreamRejection),
}

impl<T> Inbound<T> {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal(_))
    }
}

/// Head a pipeline that only makes sense on normal input. An upstream
/// failure becomes this agent's `Failure`; an upstream rejection stays a
/// rejection, so guardrail blocks propagate end to end.
pub fn expect_normal<In, Out>(inner: Stage<In, Out>) -> Stage<Inbound<In>, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let name = format!("{}[normal]", inner.name());
    Stage::raw(name, move |inbound, ctx| {
        let inner = inner.clone();
        Box::pin(async move {
            match inbound {
                Inbound::Normal(value) => inner.run(value, ctx).await,
                Inbound::Failure(failure) => Outcome::Failure {
                    error: format!(
                        "upstream failure from {}: {}",
                        failure.from_agent, failure.error
                    ),
                    ctx,
                },
                Inbound::Rejection(rejection) => Outcome::Rejected {
                    guardrail: rejection.guardrail_name,
                    reason: rejection.reason,
                    ctx,
                },
            }
        })
    })
}

/// Head a pipeline that reacts to upstream outcomes itself. The projections
/// run on the failure/rejection records and their results continue
/// downstream as `Success` values.
pub fn handle_upstream<In, Out>(
    inner: Stage<In, Out>,
    on_failure: impl Fn(UpstreamFailure) -> Out + Send + Sync + 'static,
    on_rejection: impl Fn(UpstreamRejection) -> Out + Send + Sync + 'static,
) -> Stage<Inbound<In>, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let on_failure = Arc::new(on_failure);
    let on_rejection = Arc::new(on_rejection);
    let name = format!("{}[fan-in]", inner.name());
    Stage::raw(name, move |inbound, ctx| {
        let inner = inner.clone();
        let on_failure = on_failure.clone();
        let on_rejection = on_rejection.clone();
        Box::pin(async move {
            match inbound {
                Inbound::Normal(value) => inner.run(value, ctx).await,
                Inbound::Failure(failure) => Outcome::Success {
                    value: on_failure(failure),
                    ctx,
                },
                Inbound::Rejection(rejection) => Outcome::Success {
                    value: on_rejection(rejection),
                    ctx,
                },
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::process::Process;

    fn ctx() -> PipelineContext {
        PipelineContext::initial("test", "t-1", "c-1")
    }

    fn upstream_failure() -> Inbound<i64> {
        Inbound::Failure(UpstreamFailure {
            from_agent: "A".to_string(),
            error: "boom".to_string(),
        })
    }

    #[tokio::test]
    async fn expect_normal_runs_inner_on_normal_input() {
        let stage = expect_normal(Process::pure("+1", |n: i64| n + 1));
        match stage.run(Inbound::Normal(41), ctx()).await {
            Outcome::Success { value, .. } => assert_eq!(value, 42),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expect_normal_turns_upstream_failure_into_failure() {
        let stage = expect_normal(Process::pure("+1", |n: i64| n + 1));
        match stage.run(upstream_failure(), ctx()).await {
            Outcome::Failure { error, .. } => {
                assert_eq!(error, "upstream failure from A: boom");
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expect_normal_keeps_rejections_rejected() {
        let stage = expect_normal(Process::pure("+1", |n: i64| n + 1));
        let inbound = Inbound::Rejection(UpstreamRejection {
            from_agent: "A".to_string(),
            guardrail_name: "no-secrets".to_string(),
            reason: "found a key".to_string(),
        });
        match stage.run(inbound, ctx()).await {
            Outcome::Rejected {
                guardrail, reason, ..
            } => {
                assert_eq!(guardrail, "no-secrets");
                assert_eq!(reason, "found a key");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_upstream_projects_failure_into_success() {
        let stage = handle_upstream(
            Process::pure("explain", |n: i64| format!("the answer is {n}")),
            |failure| format!("sorry, {} could not finish: {}", failure.from_agent, failure.error),
            |rejection| format!("blocked by {}", rejection.guardrail_name),
        );
        match stage.run(upstream_failure(), ctx()).await {
            Outcome::Success { value, .. } => {
                assert_eq!(value, "sorry, A could not finish: boom");
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }
}
