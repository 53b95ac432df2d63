//! Agent assembly.
//!
//! The builder is a typestate chain: `named → input → pipeline →
//! output_to | terminal`. Each step consumes the previous value, so an
//! agent without an input binding, without a pipeline, or with neither an
//! output nor a terminal marker simply cannot be expressed, and neither can
//! setting any of them twice.

use crate::context::PipelineContext;
use crate::guardrail::{guard_stage, Guardrail};
use crate::inbound::Inbound;
use crate::outcome::Outcome;
use crate::stage::Stage;
use crate::stream::task_stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct AgentBuilder {
    name: String,
}

impl AgentBuilder {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Bind the input stream and payload type. The stream name follows the
    /// `agent_<name>_tasks` convention; decoding is serde-native.
    pub fn input<In>(self) -> InputBound<In>
    where
        In: DeserializeOwned + Send + 'static,
    {
        InputBound {
            name: self.name,
            _input: PhantomData,
        }
    }
}

pub struct InputBound<In> {
    name: String,
    _input: PhantomData<fn() -> In>,
}

impl<In> InputBound<In>
where
    In: DeserializeOwned + Send + 'static,
{
    /// Install the composed pipeline. Use [`crate::inbound::expect_normal`]
    /// or [`crate::inbound::handle_upstream`] to head an ordinary stage.
    pub fn pipeline<Out>(self, stage: Stage<Inbound<In>, Out>) -> PipelineBound<In, Out>
    where
        Out: Serialize + fmt::Debug + Send + 'static,
    {
        PipelineBound {
            name: self.name,
            stage,
        }
    }
}

pub struct PipelineBound<In, Out> {
    name: String,
    stage: Stage<Inbound<In>, Out>,
}

impl<In, Out> PipelineBound<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    /// Append a guard stage after the pipeline. A block replaces the outcome
    /// with `Rejected`; an empty guard list leaves the pipeline untouched.
    #[must_use]
    pub fn guarded(
        self,
        guards: Vec<Arc<dyn Guardrail>>,
        render: impl Fn(&Out) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: self.name,
            stage: self.stage.then(guard_stage(guards, render)),
        }
    }

    /// Non-terminal agent: emit outcomes to the named downstream agent.
    pub fn output_to(self, downstream: impl Into<String>) -> AgentDefinition<In, Out> {
        let downstream = downstream.into();
        let stream = task_stream(&downstream);
        AgentDefinition {
            input_stream: task_stream(&self.name),
            name: self.name,
            output: Some(OutputBinding {
                to_agent: downstream,
                stream,
            }),
            pipeline: self.stage,
        }
    }

    /// Terminal agent: no output stream; the final outcome goes to the
    /// observability sink.
    pub fn terminal(self) -> AgentDefinition<In, Out> {
        AgentDefinition {
            input_stream: task_stream(&self.name),
            name: self.name,
            output: None,
            pipeline: self.stage,
        }
    }
}

/// Where a non-terminal agent sends its outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub to_agent: String,
    pub stream: String,
}

/// Immutable, fully-configured agent. Constructed once at startup, owns no
/// per-message state, shared read-only across in-flight messages.
pub struct AgentDefinition<In, Out> {
    name: String,
    input_stream: String,
    output: Option<OutputBinding>,
    pipeline: Stage<Inbound<In>, Out>,
}

impl<In, Out> AgentDefinition<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_stream(&self) -> &str {
        &self.input_stream
    }

    pub fn output(&self) -> Option<&OutputBinding> {
        self.output.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.output.is_none()
    }

    /// Run the composed pipeline on one decoded input.
    pub async fn execute(&self, inbound: Inbound<In>, ctx: PipelineContext) -> Outcome<Out> {
        self.pipeline.run(inbound, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::expect_normal;
    use crate::process::Process;

    fn definition() -> AgentDefinition<i64, i64> {
        AgentBuilder::named("adder")
            .input::<i64>()
            .pipeline(expect_normal(Process::pure("+1", |n: i64| n + 1)))
            .output_to("printer")
    }

    #[test]
    fn builder_derives_streams_from_agent_names() {
        let def = definition();
        assert_eq!(def.name(), "adder");
        assert_eq!(def.input_stream(), "agent_adder_tasks");
        let output = def.output().unwrap();
        assert_eq!(output.to_agent, "printer");
        assert_eq!(output.stream, "agent_printer_tasks");
        assert!(!def.is_terminal());
    }

    #[test]
    fn terminal_agents_have_no_output() {
        let def: AgentDefinition<i64, i64> = AgentBuilder::named("printer")
            .input::<i64>()
            .pipeline(expect_normal(Process::pure("id", |n: i64| n)))
            .terminal();
        assert!(def.is_terminal());
        assert!(def.output().is_none());
    }

    #[tokio::test]
    async fn execute_runs_the_pipeline() {
        let def = definition();
        let ctx = PipelineContext::initial(def.name(), "t-1", "c-1");
        match def.execute(Inbound::Normal(41), ctx).await {
            Outcome::Success { value, ctx } => {
                assert_eq!(value, 42);
                assert_eq!(ctx.step_index, 1);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }
}
