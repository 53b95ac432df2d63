//! Three-valued stage outcome.

use crate::context::PipelineContext;

/// Result of running a stage: the only three ways a stage can end.
///
/// `Rejected` is semantically distinct from `Failure` — a guardrail said no,
/// nothing went wrong — and the two are kept apart all the way to the wire.
/// Every variant carries the post-stage context.
#[derive(Debug, Clone)]
pub enum Outcome<A> {
    Success {
        value: A,
        ctx: PipelineContext,
    },
    Failure {
        error: String,
        ctx: PipelineContext,
    },
    Rejected {
        guardrail: String,
        reason: String,
        ctx: PipelineContext,
    },
}

impl<A> Outcome<A> {
    pub fn success(value: A, ctx: PipelineContext) -> Self {
        Self::Success { value, ctx }
    }

    pub fn failure(error: impl Into<String>, ctx: PipelineContext) -> Self {
        Self::Failure {
            error: error.into(),
            ctx,
        }
    }

    pub fn rejected(
        guardrail: impl Into<String>,
        reason: impl Into<String>,
        ctx: PipelineContext,
    ) -> Self {
        Self::Rejected {
            guardrail: guardrail.into(),
            reason: reason.into(),
            ctx,
        }
    }

    /// Apply `f` inside `Success`; `Failure` and `Rejected` pass through
    /// unchanged, payload and context both.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Outcome<B> {
        match self {
            Self::Success { value, ctx } => Outcome::Success {
                value: f(value),
                ctx,
            },
            Self::Failure { error, ctx } => Outcome::Failure { error, ctx },
            Self::Rejected {
                guardrail,
                reason,
                ctx,
            } => Outcome::Rejected {
                guardrail,
                reason,
                ctx,
            },
        }
    }

    /// Sequence `f` in the `Success` branch only; the other two short-circuit.
    pub fn and_then<B>(self, f: impl FnOnce(A, PipelineContext) -> Outcome<B>) -> Outcome<B> {
        match self {
            Self::Success { value, ctx } => f(value, ctx),
            Self::Failure { error, ctx } => Outcome::Failure { error, ctx },
            Self::Rejected {
                guardrail,
                reason,
                ctx,
            } => Outcome::Rejected {
                guardrail,
                reason,
                ctx,
            },
        }
    }

    /// The context, regardless of variant.
    pub fn ctx(&self) -> &PipelineContext {
        match self {
            Self::Success { ctx, .. } | Self::Failure { ctx, .. } | Self::Rejected { ctx, .. } => {
                ctx
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// The success value, discarding the context.
    pub fn into_value(self) -> Option<A> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }
}
