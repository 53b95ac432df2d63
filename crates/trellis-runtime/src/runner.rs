//! The per-agent consumer loop.
//!
//! One long-running loop pulls single messages from the agent's task stream.
//! Every delivered message runs in its own task, bounded by a semaphore
//! sized to the prefetch count; the loop itself never blocks on a pipeline.
//! Non-terminal agents always emit a downstream envelope, whatever the
//! outcome; terminal agents print the labelled final block and persist it
//! before acking.

use crate::broker::{term_ack, Broker, BrokerError};
use crate::config::RuntimeConfig;
use crate::observability::{
    observer_handle, JsonlSink, LogLevel, LogRecord, LogSource, StageTiming,
};
use async_nats::jetstream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use trellis_contract::{
    decode_payload, encode_payload, AgentDefinition, Envelope, Outcome, OutputBinding,
    PayloadType, PipelineContext, UpstreamFailure, UpstreamRejection,
};

/// How long shutdown waits for in-flight messages before giving up.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Run the agent until ctrl-c.
pub async fn run_agent<In, Out>(
    definition: AgentDefinition<In, Out>,
    config: RuntimeConfig,
) -> Result<(), RuntimeError>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });
    run_agent_until(definition, config, shutdown).await
}

/// Run the agent until the token is cancelled.
pub async fn run_agent_until<In, Out>(
    definition: AgentDefinition<In, Out>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
) -> Result<(), RuntimeError>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    let sink = JsonlSink::spawn(&config.log_root);
    let broker = Broker::connect(&config).await?;
    broker.ensure_task_stream(definition.input_stream()).await?;
    if let Some(output) = definition.output() {
        broker.ensure_task_stream(&output.stream).await?;
    }
    let consumer = broker
        .task_consumer(definition.input_stream(), definition.name(), config.prefetch)
        .await?;
    tracing::info!(
        agent = definition.name(),
        stream = definition.input_stream(),
        terminal = definition.is_terminal(),
        prefetch = config.prefetch,
        "agent consuming"
    );

    let definition = Arc::new(definition);
    let semaphore = Arc::new(Semaphore::new(config.prefetch));

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let fetched = tokio::select! {
            _ = shutdown.cancelled() => break,
            fetched = consumer.next(config.idle_delay) => fetched,
        };
        match fetched {
            Ok(Some(message)) => {
                let definition = definition.clone();
                let broker = broker.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    handle_delivery(message, definition, broker, sink).await;
                    drop(permit);
                });
            }
            Ok(None) => drop(permit),
            Err(error) => {
                tracing::error!(%error, agent = definition.name(), "message pull failed");
                drop(permit);
                tokio::time::sleep(config.idle_delay).await;
            }
        }
    }

    tracing::info!(agent = definition.name(), "draining in-flight messages");
    let drain = semaphore.acquire_many_owned(config.prefetch as u32);
    if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
        tracing::warn!(
            agent = definition.name(),
            "in-flight messages did not drain before the shutdown deadline"
        );
    }
    sink.flush().await;
    Ok(())
}

async fn handle_delivery<In, Out>(
    message: jetstream::Message,
    definition: Arc<AgentDefinition<In, Out>>,
    broker: Broker,
    sink: JsonlSink,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    let envelope = match Envelope::decode(&message.payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::error!(%error, agent = definition.name(), "failed to decode envelope");
            term_ack(&message).await;
            return;
        }
    };

    let outcome = run_envelope(&definition, &envelope, &sink).await;
    let summary = summary_record(definition.name(), &outcome);
    tracing::info!(
        agent = definition.name(),
        conversation = %envelope.conversation_id,
        summary = %summary.message,
        "message processed"
    );
    sink.emit(summary);

    if let Some(output) = definition.output() {
        let outbound = outbound_envelope(definition.name(), output, &envelope, &outcome);
        let encoded = match outbound.encode() {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, agent = definition.name(), "failed to encode outbound envelope");
                term_ack(&message).await;
                return;
            }
        };
        if let Err(error) = broker.publish(&output.stream, encoded).await {
            tracing::error!(%error, stream = %output.stream, "publish failed");
            term_ack(&message).await;
            return;
        }
    } else {
        let block = terminal_block(definition.name(), &outcome);
        println!("{block}");
        let record = terminal_record(definition.name(), &outcome);
        if let Err(error) = sink.write_now(&record).await {
            tracing::error!(%error, agent = definition.name(), "terminal sink write failed");
            term_ack(&message).await;
            return;
        }
    }

    if let Err(error) = message.double_ack().await {
        tracing::error!(%error, agent = definition.name(), "ack failed");
    }
}

/// Decode the payload and run the pipeline for one inbound envelope. A
/// payload that does not decode yields the `Failed to decode input` failure;
/// a panicking pipeline is caught at the task boundary.
pub async fn run_envelope<In, Out>(
    definition: &Arc<AgentDefinition<In, Out>>,
    envelope: &Envelope,
    sink: &JsonlSink,
) -> Outcome<Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + fmt::Debug + Send + 'static,
{
    let ctx = PipelineContext::initial_with_observer(
        definition.name(),
        &envelope.trace_id,
        &envelope.conversation_id,
        observer_handle(sink),
    );
    match decode_payload::<In>(envelope) {
        Ok(inbound) => {
            let task_definition = definition.clone();
            let task_ctx = ctx.clone();
            match tokio::spawn(async move { task_definition.execute(inbound, task_ctx).await })
                .await
            {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    Outcome::failure(format!("pipeline task failed: {join_error}"), ctx)
                }
            }
        }
        Err(error) => Outcome::failure(format!("Failed to decode input: {error}"), ctx),
    }
}

/// Build the downstream envelope for one outcome. `trace_id` and
/// `conversation_id` are copied verbatim from the inbound envelope;
/// `from_agent` is this agent, `to_agent` the output binding's target.
pub fn outbound_envelope<Out: Serialize + fmt::Debug>(
    agent: &str,
    output: &OutputBinding,
    inbound: &Envelope,
    outcome: &Outcome<Out>,
) -> Envelope {
    let (payload_type, payload) = match outcome {
        Outcome::Success { value, .. } => (PayloadType::Normal, encode_payload(value)),
        Outcome::Failure { error, .. } => (
            PayloadType::UpstreamFailure,
            encode_payload(&UpstreamFailure {
                from_agent: agent.to_string(),
                error: error.clone(),
            }),
        ),
        Outcome::Rejected {
            guardrail, reason, ..
        } => (
            PayloadType::UpstreamRejection,
            encode_payload(&UpstreamRejection {
                from_agent: agent.to_string(),
                guardrail_name: guardrail.clone(),
                reason: reason.clone(),
            }),
        ),
    };
    Envelope::new(
        agent,
        &output.to_agent,
        &inbound.trace_id,
        &inbound.conversation_id,
        payload_type,
        payload,
    )
}

fn summary_record<Out>(agent: &str, outcome: &Outcome<Out>) -> LogRecord {
    let ctx = outcome.ctx();
    let stages: Vec<StageTiming> = ctx
        .step_logs
        .iter()
        .map(|log| StageTiming {
            stage: log.stage_name.clone(),
            duration_ms: log.duration_ms,
        })
        .collect();
    let total: u64 = stages.iter().map(|s| s.duration_ms).sum();
    let (level, message) = match outcome {
        Outcome::Success { .. } => (
            LogLevel::Info,
            format!(
                "pipeline succeeded in {total}ms over {} stages",
                stages.len()
            ),
        ),
        Outcome::Failure { error, .. } => (LogLevel::Error, format!("pipeline failed: {error}")),
        Outcome::Rejected {
            guardrail, reason, ..
        } => (
            LogLevel::Error,
            format!("pipeline rejected by {guardrail}: {reason}"),
        ),
    };
    LogRecord::now(
        "message_summary",
        &ctx.conversation_id,
        level,
        LogSource::Agent,
        message,
    )
    .with_agent(agent)
    .with_duration(total)
    .with_stages(stages)
}

/// The user-visible final block a terminal agent prints.
pub fn terminal_block<Out: Serialize + fmt::Debug>(agent: &str, outcome: &Outcome<Out>) -> String {
    match outcome {
        Outcome::Success { value, .. } => {
            let payload = encode_payload(value);
            let rendered = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|_| payload.to_string());
            format!("=== {agent}: final output ===\n{rendered}\n===")
        }
        Outcome::Failure { error, .. } => {
            format!("=== {agent}: FAILED ===\n{error}\n===")
        }
        Outcome::Rejected {
            guardrail, reason, ..
        } => {
            format!("=== {agent}: REJECTED ===\nguardrail: {guardrail}\nreason: {reason}\n===")
        }
    }
}

fn terminal_record<Out: Serialize + fmt::Debug>(agent: &str, outcome: &Outcome<Out>) -> LogRecord {
    let conversation_id = &outcome.ctx().conversation_id;
    match outcome {
        Outcome::Success { value, .. } => LogRecord::now(
            "terminal_output",
            conversation_id,
            LogLevel::Info,
            LogSource::Agent,
            encode_payload(value).to_string(),
        )
        .with_agent(agent),
        Outcome::Failure { error, .. } => LogRecord::now(
            "terminal_output",
            conversation_id,
            LogLevel::Error,
            LogSource::Agent,
            format!("failed: {error}"),
        )
        .with_agent(agent),
        Outcome::Rejected {
            guardrail, reason, ..
        } => LogRecord::now(
            "terminal_output",
            conversation_id,
            LogLevel::Error,
            LogSource::Agent,
            format!("rejected by {guardrail}: {reason}"),
        )
        .with_agent(agent),
    }
}
