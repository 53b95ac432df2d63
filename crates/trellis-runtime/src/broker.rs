//! JetStream broker client.
//!
//! Task streams are durable WorkQueue streams on file storage, one subject
//! per stream. Consumers are durable pull consumers with explicit ack;
//! `max_ack_pending` carries the prefetch bound.

use crate::config::RuntimeConfig;
use async_nats::jetstream::{self, consumer::pull};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connect failed after {attempts} attempts: {last_error}")]
    Connect { attempts: u32, last_error: String },
    #[error("jetstream error: {0}")]
    JetStream(String),
    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },
}

#[derive(Clone)]
pub struct Broker {
    jetstream: jetstream::Context,
}

impl Broker {
    /// Connect with a bounded attempt count and fixed spacing.
    pub async fn connect(config: &RuntimeConfig) -> Result<Self, BrokerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match async_nats::connect(&config.nats_url).await {
                Ok(client) => {
                    return Ok(Self {
                        jetstream: jetstream::new(client),
                    });
                }
                Err(error) if attempt < config.connect_attempts => {
                    tracing::warn!(
                        %error,
                        attempt,
                        attempts = config.connect_attempts,
                        url = %config.nats_url,
                        "broker connect failed; retrying"
                    );
                    tokio::time::sleep(config.connect_delay).await;
                }
                Err(error) => {
                    return Err(BrokerError::Connect {
                        attempts: attempt,
                        last_error: error.to_string(),
                    });
                }
            }
        }
    }

    /// Idempotently declare a durable task stream.
    pub async fn ensure_task_stream(&self, stream: &str) -> Result<(), BrokerError> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream.to_string(),
                subjects: vec![stream.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))?;
        Ok(())
    }

    /// Publish and await the JetStream ack, retrying a bounded number of
    /// times before giving up.
    pub async fn publish(&self, subject: &str, payload: String) -> Result<(), BrokerError> {
        let mut last_error = String::new();
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.publish_once(subject, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    last_error = error;
                    if attempt < PUBLISH_ATTEMPTS {
                        tracing::warn!(
                            subject,
                            attempt,
                            error = %last_error,
                            "publish failed; retrying"
                        );
                        tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(BrokerError::Publish {
            subject: subject.to_string(),
            reason: last_error,
        })
    }

    async fn publish_once(&self, subject: &str, payload: String) -> Result<(), String> {
        self.jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| e.to_string())?
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Durable pull consumer for an agent's task stream.
    pub async fn task_consumer(
        &self,
        stream: &str,
        agent: &str,
        prefetch: usize,
    ) -> Result<TaskConsumer, BrokerError> {
        let stream_handle = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))?;
        let durable = format!("{agent}_worker");
        let consumer = stream_handle
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_ack_pending: prefetch as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))?;
        Ok(TaskConsumer { inner: consumer })
    }
}

/// Single-message pull interface over a durable consumer.
pub struct TaskConsumer {
    inner: jetstream::consumer::Consumer<pull::Config>,
}

impl TaskConsumer {
    /// Fetch at most one message, waiting up to `wait` before reporting an
    /// empty pull.
    pub async fn next(&self, wait: Duration) -> Result<Option<jetstream::Message>, BrokerError> {
        let mut batch = self
            .inner
            .fetch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| BrokerError::JetStream(e.to_string()))?;
        match batch.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(BrokerError::JetStream(error.to_string())),
            None => Ok(None),
        }
    }
}

/// Negative-ack without requeue.
pub async fn term_ack(message: &jetstream::Message) {
    if let Err(error) = message
        .ack_with(jetstream::AckKind::Term)
        .await
    {
        tracing::error!(error = %error, "term ack failed");
    }
}
