//! Higher-level stage factories with reflection.
//!
//! A process is a named stage with a typed constructor and an optional
//! bounded retry loop. Reflection rewrites the input through a callback
//! between attempts; it is a plain bounded iteration, never an unstructured
//! retry combinator, so attempt counts cannot nest or shadow each other.

use crate::context::PipelineContext;
use crate::model::{ModelExecutor, ModelRequest};
use crate::outcome::Outcome;
use crate::stage::{Stage, StageVerdict};
use crate::tool::{Tool, ToolResult};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on the reflection count any process may declare.
pub const REFLECTION_BOUND: u32 = 10;

#[derive(Debug, Clone, Error)]
#[error("max reflections must be in 0..=10, got {0}")]
pub struct ReflectionBoundError(pub u32);

/// Bounded retry count. `0` means one attempt, no retries; `n` means one
/// attempt plus up to `n` reflections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxReflections(u32);

impl MaxReflections {
    pub const NONE: Self = Self(0);

    pub fn new(n: u32) -> Result<Self, ReflectionBoundError> {
        if n <= REFLECTION_BOUND {
            Ok(Self(n))
        } else {
            Err(ReflectionBoundError(n))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Retry policy for one process: the bound plus the input-rewriting callback
/// applied between attempts (identity by default).
pub struct Reflection<A> {
    max: MaxReflections,
    rewrite: Arc<dyn Fn(A, &str) -> A + Send + Sync>,
}

impl<A> Clone for Reflection<A> {
    fn clone(&self) -> Self {
        Self {
            max: self.max,
            rewrite: self.rewrite.clone(),
        }
    }
}

impl<A> Reflection<A> {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max: MaxReflections::NONE,
            rewrite: Arc::new(|input, _| input),
        }
    }

    /// Up to `max` retries, re-feeding the input unchanged.
    pub fn up_to(max: MaxReflections) -> Self {
        Self {
            max,
            rewrite: Arc::new(|input, _| input),
        }
    }

    /// Up to `max` retries, rewriting the input with the last error first.
    pub fn rewriting(
        max: MaxReflections,
        rewrite: impl Fn(A, &str) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            max,
            rewrite: Arc::new(rewrite),
        }
    }
}

type ReflectBody<A, B> =
    Arc<dyn Fn(A, PipelineContext) -> BoxFuture<'static, Result<B, String>> + Send + Sync>;

/// Run `body` under the reflection loop and wrap it into an instrumented
/// stage. Total attempts are `1 + max`; exhaustion with `max > 0` yields the
/// `max reflections (n) exceeded` failure, while `max = 0` passes the raw
/// error through.
fn reflected<A, B>(name: &str, reflection: Reflection<A>, body: ReflectBody<A, B>) -> Stage<A, B>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
{
    let stage_name: Arc<str> = Arc::from(name);
    Stage::instrument(name, move |input: A, ctx| {
        let body = body.clone();
        let reflection = reflection.clone();
        let stage_name = stage_name.clone();
        Box::pin(async move {
            let max = reflection.max.get();
            let mut input = input;
            let mut failed: u32 = 0;
            loop {
                match body(input.clone(), ctx.clone()).await {
                    Ok(value) => return (StageVerdict::Ok(value), failed),
                    Err(error) => {
                        failed += 1;
                        if failed > max {
                            let message = if max == 0 {
                                error
                            } else {
                                format!("max reflections ({max}) exceeded: {error}")
                            };
                            return (StageVerdict::Fail(message), max);
                        }
                        tracing::warn!(
                            stage = %stage_name,
                            conversation = %ctx.conversation_id,
                            attempt = failed,
                            error = %error,
                            "reflecting on failed attempt"
                        );
                        input = (reflection.rewrite)(input, &error);
                    }
                }
            }
        })
    })
}

/// Namespace for the process constructors.
pub struct Process;

impl Process {
    /// Infallible synchronous transform.
    pub fn pure<A, B>(name: &str, f: impl Fn(A) -> B + Send + Sync + 'static) -> Stage<A, B>
    where
        A: Send + 'static,
        B: Send + 'static,
    {
        let f = Arc::new(f);
        Stage::instrument(name, move |input, _ctx| {
            let f = f.clone();
            Box::pin(async move { (StageVerdict::Ok(f(input)), 0) })
        })
    }

    /// Fallible synchronous transform; the error becomes a `Failure`.
    pub fn attempt<A, B>(
        name: &str,
        f: impl Fn(A) -> Result<B, String> + Send + Sync + 'static,
    ) -> Stage<A, B>
    where
        A: Send + 'static,
        B: Send + 'static,
    {
        let f = Arc::new(f);
        Stage::instrument(name, move |input, _ctx| {
            let f = f.clone();
            Box::pin(async move {
                match f(input) {
                    Ok(value) => (StageVerdict::Ok(value), 0),
                    Err(error) => (StageVerdict::Fail(error), 0),
                }
            })
        })
    }

    /// Effectful async step with reflection over the whole body.
    pub fn effect<A, B, F, Fut>(name: &str, reflection: Reflection<A>, f: F) -> Stage<A, B>
    where
        A: Clone + Send + 'static,
        B: Send + 'static,
        F: Fn(A, PipelineContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let body: ReflectBody<A, B> = Arc::new(move |input, ctx| Box::pin(f(input, ctx)));
        reflected(name, reflection, body)
    }

    /// Model-backed step: build a prompt from input and context, issue one
    /// blocking model call, parse the text into the output. Reflection spans
    /// the whole build → call → parse sequence.
    pub fn model<A, B, P, R>(
        name: &str,
        reflection: Reflection<A>,
        executor: Arc<dyn ModelExecutor>,
        model: impl Into<String>,
        build_prompt: P,
        parse: R,
    ) -> Stage<A, B>
    where
        A: Clone + Send + 'static,
        B: Send + 'static,
        P: Fn(&A, &PipelineContext) -> String + Send + Sync + 'static,
        R: Fn(&A, &str) -> Result<B, String> + Send + Sync + 'static,
    {
        let model = model.into();
        let build_prompt = Arc::new(build_prompt);
        let parse = Arc::new(parse);
        let body: ReflectBody<A, B> = Arc::new(move |input, ctx| {
            let executor = executor.clone();
            let model = model.clone();
            let build_prompt = build_prompt.clone();
            let parse = parse.clone();
            Box::pin(async move {
                let request = ModelRequest {
                    prompt: build_prompt(&input, &ctx),
                    model,
                    conversation_id: ctx.conversation_id.clone(),
                    agent_name: ctx.agent_name.clone(),
                    prompt_version: None,
                };
                let reply = executor
                    .complete(request)
                    .await
                    .map_err(|e| e.to_string())?;
                parse(&input, &reply.response)
            })
        });
        reflected(name, reflection, body)
    }

    /// Tool-backed step: convert input into a tool request, invoke the tool,
    /// convert its result into the output. A tool `Error` status feeds the
    /// reflection loop like any other failure.
    pub fn tool<A, B, Q, R>(
        name: &str,
        reflection: Reflection<A>,
        tool: Arc<dyn Tool>,
        to_request: Q,
        from_result: R,
    ) -> Stage<A, B>
    where
        A: Clone + Send + 'static,
        B: Send + 'static,
        Q: Fn(&A) -> Value + Send + Sync + 'static,
        R: Fn(&A, ToolResult) -> Result<B, String> + Send + Sync + 'static,
    {
        let to_request = Arc::new(to_request);
        let from_result = Arc::new(from_result);
        let body: ReflectBody<A, B> = Arc::new(move |input, _ctx| {
            let tool = tool.clone();
            let to_request = to_request.clone();
            let from_result = from_result.clone();
            Box::pin(async move {
                let result = tool.invoke(to_request(&input)).await;
                if result.is_error() {
                    let message = result
                        .message
                        .unwrap_or_else(|| format!("tool {} failed", result.tool_name));
                    return Err(message);
                }
                from_result(&input, result)
            })
        });
        reflected(name, reflection, body)
    }

    /// Run `inner` only when the predicate holds; otherwise pass the input
    /// through unchanged.
    pub fn when<A, P>(name: &str, predicate: P, inner: Stage<A, A>) -> Stage<A, A>
    where
        A: Send + 'static,
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Stage::raw(name, move |input, ctx| {
            if predicate(&input) {
                let inner = inner.clone();
                Box::pin(async move { inner.run(input, ctx).await })
            } else {
                Box::pin(std::future::ready(Outcome::Success { value: input, ctx }))
            }
        })
    }
}
