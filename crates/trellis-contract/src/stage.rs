//! The atomic composable pipeline unit.
//!
//! A [`Stage`] is a named `(A, PipelineContext) -> Outcome<B>` over a boxed
//! async body. Stages never raise; every domain fault is encoded into the
//! outcome. Composition short-circuits on the first non-`Success`.

use crate::context::{PipelineContext, StageLog, StageState};
use crate::outcome::Outcome;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// How an instrumented stage body ended, plus the reflection count to record.
pub(crate) enum StageVerdict<B> {
    Ok(B),
    Fail(String),
    Reject { guardrail: String, reason: String },
}

type StageBody<A, B> = dyn Fn(A, PipelineContext) -> BoxFuture<'static, Outcome<B>> + Send + Sync;

pub struct Stage<A, B> {
    name: Arc<str>,
    body: Arc<StageBody<A, B>>,
}

impl<A, B> Clone for Stage<A, B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl<A, B> Stage<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    /// Un-instrumented stage: no log entry, no step increment. Used for
    /// composition glue and pass-throughs so the stage algebra laws hold.
    pub(crate) fn raw<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A, PipelineContext) -> BoxFuture<'static, Outcome<B>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(body),
        }
    }

    /// Wrap a body with the logging wrapper: one-line summaries on start and
    /// completion, wall-clock duration, one appended [`StageLog`], and the
    /// step-index increment. All `Process` constructors go through here.
    pub(crate) fn instrument<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A, PipelineContext) -> BoxFuture<'static, (StageVerdict<B>, u32)>
            + Send
            + Sync
            + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let stage_name = name.clone();
        Self {
            name,
            body: Arc::new(move |input, ctx: PipelineContext| {
                let stage_name = stage_name.clone();
                let fut = body(input, ctx.clone());
                Box::pin(async move {
                    ctx.observer().stage_started(&ctx, &stage_name);
                    tracing::info!(
                        agent = %ctx.agent_name,
                        conversation = %ctx.conversation_id,
                        stage = %stage_name,
                        step = ctx.step_index,
                        "stage started"
                    );
                    let started = Instant::now();
                    let (verdict, reflections_used) = fut.await;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let state = match &verdict {
                        StageVerdict::Ok(_) => StageState::Success,
                        StageVerdict::Fail(error) => StageState::Failure(error.clone()),
                        StageVerdict::Reject { guardrail, reason } => {
                            StageState::Rejected(format!("{guardrail}: {reason}"))
                        }
                    };
                    let log = StageLog {
                        stage_name: stage_name.to_string(),
                        stage_index: ctx.step_index,
                        duration_ms,
                        reflections_used,
                        state,
                    };
                    tracing::info!(
                        agent = %ctx.agent_name,
                        conversation = %ctx.conversation_id,
                        stage = %stage_name,
                        step = ctx.step_index,
                        duration_ms,
                        outcome = %log.state,
                        "stage finished"
                    );
                    let next = ctx.with_log(log.clone()).next_step();
                    next.observer().stage_finished(&next, &log);
                    match verdict {
                        StageVerdict::Ok(value) => Outcome::Success { value, ctx: next },
                        StageVerdict::Fail(error) => Outcome::Failure { error, ctx: next },
                        StageVerdict::Reject { guardrail, reason } => Outcome::Rejected {
                            guardrail,
                            reason,
                            ctx: next,
                        },
                    }
                })
            }),
        }
    }

    /// Instrumented stage over a plain fallible async body.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(A, PipelineContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, String>> + Send + 'static,
    {
        Self::instrument(name, move |input, ctx| {
            let fut = f(input, ctx);
            Box::pin(async move {
                match fut.await {
                    Ok(value) => (StageVerdict::Ok(value), 0),
                    Err(error) => (StageVerdict::Fail(error), 0),
                }
            })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the stage.
    pub async fn run(&self, input: A, ctx: PipelineContext) -> Outcome<B> {
        (self.body)(input, ctx).await
    }

    /// Sequential composition. Runs `self`; on `Success` feeds the value and
    /// the updated context to `next`; otherwise `next` is never invoked and
    /// the outcome passes through unchanged. Associative, with
    /// [`Stage::identity`] as the two-sided unit.
    pub fn then<C>(self, next: Stage<B, C>) -> Stage<A, C>
    where
        C: Send + 'static,
    {
        let name = format!("{} -> {}", self.name, next.name);
        Stage::raw(name, move |input, ctx| {
            let first = self.clone();
            let second = next.clone();
            Box::pin(async move {
                match first.run(input, ctx).await {
                    Outcome::Success { value, ctx } => second.run(value, ctx).await,
                    Outcome::Failure { error, ctx } => Outcome::Failure { error, ctx },
                    Outcome::Rejected {
                        guardrail,
                        reason,
                        ctx,
                    } => Outcome::Rejected {
                        guardrail,
                        reason,
                        ctx,
                    },
                }
            })
        })
    }

    /// Transform the `Success` payload only; no log entry, no step change.
    pub fn map<C>(self, f: impl Fn(B) -> C + Send + Sync + 'static) -> Stage<A, C>
    where
        C: Send + 'static,
    {
        let f = Arc::new(f);
        let name = self.name.to_string();
        Stage::raw(name, move |input, ctx| {
            let inner = self.clone();
            let f = f.clone();
            Box::pin(async move { inner.run(input, ctx).await.map(|value| f(value)) })
        })
    }

    /// Sequence a continuation over the success payload. Prefer composing
    /// named stages with [`Stage::then`]; this exists for the rare spot
    /// where a continuation must inspect the context.
    pub fn and_then<C>(
        self,
        f: impl Fn(B, PipelineContext) -> Outcome<C> + Send + Sync + 'static,
    ) -> Stage<A, C>
    where
        C: Send + 'static,
    {
        let f = Arc::new(f);
        let name = self.name.to_string();
        Stage::raw(name, move |input, ctx| {
            let inner = self.clone();
            let f = f.clone();
            Box::pin(async move { inner.run(input, ctx).await.and_then(|value, ctx| f(value, ctx)) })
        })
    }
}

impl<A> Stage<A, A>
where
    A: Send + 'static,
{
    /// Pass-through unit of composition.
    pub fn identity() -> Self {
        Stage::raw("identity", |value, ctx| {
            Box::pin(std::future::ready(Outcome::Success { value, ctx }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> PipelineContext {
        PipelineContext::initial("test", "t-1", "c-1")
    }

    fn add_one() -> Stage<i64, i64> {
        Stage::new("+1", |n: i64, _| async move { Ok(n + 1) })
    }

    fn double() -> Stage<i64, i64> {
        Stage::new("*2", |n: i64, _| async move { Ok(n * 2) })
    }

    #[tokio::test]
    async fn composed_pure_stages_produce_value_and_two_logs() {
        let pipeline = add_one().then(double());
        match pipeline.run(5, ctx()).await {
            Outcome::Success { value, ctx } => {
                assert_eq!(value, 12);
                assert_eq!(ctx.step_index, 2);
                assert_eq!(ctx.step_logs.len(), 2);
                assert_eq!(ctx.step_logs[0].stage_name, "+1");
                assert_eq!(ctx.step_logs[0].stage_index, 0);
                assert_eq!(ctx.step_logs[1].stage_name, "*2");
                assert_eq!(ctx.step_logs[1].stage_index, 1);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_short_circuits_later_stages() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_stage = hits.clone();
        let failing: Stage<i64, i64> =
            Stage::new("boom", |_, _| async move { Err("boom".to_string()) });
        let counting: Stage<i64, i64> = Stage::new("count", move |n: i64, _| {
            let hits = hits_in_stage.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        });

        match failing.then(counting).run(0, ctx()).await {
            Outcome::Failure { error, ctx } => {
                assert_eq!(error, "boom");
                assert_eq!(ctx.step_index, 1);
                assert_eq!(ctx.step_logs.len(), 1);
            }
            other => panic!("expected Failure, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn composition_is_associative_observationally() {
        let left = add_one().then(double()).then(add_one());
        let right = add_one().then(double().then(add_one()));

        let l = left.run(3, ctx()).await;
        let r = right.run(3, ctx()).await;
        match (l, r) {
            (
                Outcome::Success { value: lv, ctx: lc },
                Outcome::Success { value: rv, ctx: rc },
            ) => {
                assert_eq!(lv, rv);
                assert_eq!(lc.step_index, rc.step_index);
                let ln: Vec<u32> = lc.step_logs.iter().map(|l| l.stage_index).collect();
                let rn: Vec<u32> = rc.step_logs.iter().map(|l| l.stage_index).collect();
                assert_eq!(ln, rn);
                assert_eq!(ln, [0, 1, 2]);
            }
            other => panic!("expected two Successes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_is_a_two_sided_unit() {
        let alone = add_one().run(1, ctx()).await;
        let left = Stage::identity().then(add_one()).run(1, ctx()).await;
        let right = add_one().then(Stage::identity()).run(1, ctx()).await;

        for out in [left, right] {
            match (&alone, &out) {
                (
                    Outcome::Success { value: a, ctx: ac },
                    Outcome::Success { value: b, ctx: bc },
                ) => {
                    assert_eq!(a, b);
                    assert_eq!(ac.step_index, bc.step_index);
                    assert_eq!(ac.step_logs.len(), bc.step_logs.len());
                }
                other => panic!("expected Successes, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn map_is_outcome_preserving_on_non_success() {
        let failing: Stage<i64, i64> =
            Stage::new("boom", |_, _| async move { Err("boom".to_string()) });
        match failing.map(|n| n + 100).run(0, ctx()).await {
            Outcome::Failure { error, .. } => assert_eq!(error, "boom"),
            other => panic!("expected Failure, got {other:?}"),
        }

        match add_one().map(|n| n * 10).run(1, ctx()).await {
            Outcome::Success { value, .. } => assert_eq!(value, 20),
            other => panic!("expected Success, got {other:?}"),
        }
    }
}
