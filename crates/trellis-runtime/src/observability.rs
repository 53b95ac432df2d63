//! Structured per-message log streams keyed by conversation identity.
//!
//! Records fan into two append-only JSONL files per conversation:
//! `agent_logs/<conversation_id>_<agent>.jsonl` and
//! `conversation_logs/<conversation_id>.jsonl`. Writes flow through an mpsc
//! channel into a background writer task; appends retry with exponential
//! backoff capped at a small maximum, and a final failure is reported to
//! stderr, never into the pipeline outcome.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use trellis_contract::{PipelineContext, StageLog, StageObserver, StageState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    Agent,
    Submit,
    #[serde(rename = "LLM")]
    Llm,
    #[serde(rename = "CLI")]
    Cli,
}

/// One `(stage, duration)` pair of the per-message roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

/// One observability record. Model-call records additionally carry the
/// prompt, response, model identity, and call latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub conversation_id: String,
    pub level: LogLevel,
    pub source: LogSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageTiming>>,
}

impl LogRecord {
    pub fn now(
        record_type: impl Into<String>,
        conversation_id: impl Into<String>,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            conversation_id: conversation_id.into(),
            level,
            source,
            agent_name: None,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            prompt: None,
            response: None,
            model: None,
            duration_ms: None,
            prompt_version_id: None,
            input_tokens: None,
            output_tokens: None,
            stages: None,
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_model_call(
        mut self,
        prompt: impl Into<String>,
        response: impl Into<String>,
        model: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        self.prompt = Some(prompt.into());
        self.response = Some(response.into());
        self.model = Some(model.into());
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_prompt_version(mut self, version_id: impl Into<String>) -> Self {
        self.prompt_version_id = Some(version_id.into());
        self
    }

    #[must_use]
    pub fn with_token_usage(
        mut self,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    ) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    #[must_use]
    pub fn with_stages(mut self, stages: Vec<StageTiming>) -> Self {
        self.stages = Some(stages);
        self
    }
}

enum SinkMessage {
    Record(LogRecord),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the background JSONL writer.
#[derive(Clone)]
pub struct JsonlSink {
    root: PathBuf,
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl JsonlSink {
    pub fn spawn(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(root.clone(), rx));
        Self { root, tx }
    }

    /// Queue a record; never blocks, never fails the caller.
    pub fn emit(&self, record: LogRecord) {
        let _ = self.tx.send(SinkMessage::Record(record));
    }

    /// Write a record directly, bypassing the queue, and report the result.
    /// Used for the terminal output whose persistence gates the ack.
    pub async fn write_now(&self, record: &LogRecord) -> std::io::Result<()> {
        write_record(&self.root, record).await
    }

    /// Wait until every queued record has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SinkMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl StageObserver for JsonlSink {
    fn stage_started(&self, ctx: &PipelineContext, stage_name: &str) {
        self.emit(
            LogRecord::now(
                "stage_started",
                &ctx.conversation_id,
                LogLevel::Info,
                LogSource::Agent,
                format!("stage {stage_name} started (step {})", ctx.step_index),
            )
            .with_agent(&ctx.agent_name),
        );
    }

    fn stage_finished(&self, ctx: &PipelineContext, log: &StageLog) {
        let level = match log.state {
            StageState::Success => LogLevel::Info,
            StageState::Failure(_) | StageState::Rejected(_) => LogLevel::Error,
        };
        self.emit(
            LogRecord::now(
                "stage_finished",
                &ctx.conversation_id,
                level,
                LogSource::Agent,
                format!(
                    "stage {} (step {}) finished in {}ms: {}",
                    log.stage_name, log.stage_index, log.duration_ms, log.state
                ),
            )
            .with_agent(&ctx.agent_name)
            .with_duration(log.duration_ms),
        );
    }
}

async fn writer_loop(root: PathBuf, mut rx: mpsc::UnboundedReceiver<SinkMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            SinkMessage::Record(record) => {
                if let Err(error) = write_record(&root, &record).await {
                    tracing::error!(%error, record_type = %record.record_type, "log sink write failed");
                }
            }
            SinkMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_record(root: &Path, record: &LogRecord) -> std::io::Result<()> {
    let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
    let conversation_path = root
        .join("conversation_logs")
        .join(format!("{}.jsonl", record.conversation_id));
    append_with_retry(&conversation_path, &line).await?;

    if let Some(agent) = &record.agent_name {
        let agent_path = root
            .join("agent_logs")
            .join(format!("{}_{}.jsonl", record.conversation_id, agent));
        append_with_retry(&agent_path, &line).await?;
    }
    Ok(())
}

const APPEND_ATTEMPTS: u32 = 4;
const BACKOFF_START: Duration = Duration::from_millis(50);
const BACKOFF_CAP: Duration = Duration::from_millis(400);

async fn append_with_retry(path: &Path, line: &str) -> std::io::Result<()> {
    let mut delay = BACKOFF_START;
    for attempt in 1..=APPEND_ATTEMPTS {
        match append_once(path, line).await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < APPEND_ATTEMPTS => {
                tracing::warn!(%error, path = %path.display(), attempt, "log append failed; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
            Err(error) => return Err(error),
        }
    }
    unreachable!("append loop returns within the attempt bound")
}

async fn append_once(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

/// Build the observer handle an agent context should carry.
pub fn observer_handle(sink: &JsonlSink) -> Arc<dyn StageObserver> {
    Arc::new(sink.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_land_in_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::spawn(dir.path());
        sink.emit(
            LogRecord::now(
                "stage_started",
                "C-42",
                LogLevel::Info,
                LogSource::Agent,
                "stage normalize started (step 0)",
            )
            .with_agent("preprocessor"),
        );
        sink.flush().await;

        let conversation = dir.path().join("conversation_logs/C-42.jsonl");
        let agent = dir.path().join("agent_logs/C-42_preprocessor.jsonl");
        let conversation_text = std::fs::read_to_string(&conversation).unwrap();
        let agent_text = std::fs::read_to_string(&agent).unwrap();
        assert_eq!(conversation_text, agent_text);

        let record: LogRecord = serde_json::from_str(conversation_text.trim()).unwrap();
        assert_eq!(record.record_type, "stage_started");
        assert_eq!(record.conversation_id, "C-42");
        assert_eq!(record.level, LogLevel::Info);
    }

    #[tokio::test]
    async fn records_without_agent_skip_the_agent_stream() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::spawn(dir.path());
        sink.emit(LogRecord::now(
            "submitted",
            "C-7",
            LogLevel::Info,
            LogSource::Submit,
            "request submitted",
        ));
        sink.flush().await;

        assert!(dir.path().join("conversation_logs/C-7.jsonl").exists());
        assert!(!dir.path().join("agent_logs").exists());
    }

    #[test]
    fn wire_names_match_the_contract() {
        let record = LogRecord::now("x", "c", LogLevel::Error, LogSource::Llm, "m")
            .with_model_call("p", "r", "test-model", 12)
            .with_prompt_version("v-1.1")
            .with_token_usage(Some(120), Some(34));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "x");
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["source"], "LLM");
        assert_eq!(value["duration_ms"], 12);
        assert_eq!(value["prompt_version_id"], "v-1.1");
        assert_eq!(value["input_tokens"], 120);
        assert_eq!(value["output_tokens"], 34);
        assert!(value.get("stages").is_none());
    }

    #[test]
    fn analytics_fields_are_omitted_when_absent() {
        let record = LogRecord::now("x", "c", LogLevel::Info, LogSource::Agent, "m");
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("prompt_version_id").is_none());
        assert!(value.get("input_tokens").is_none());
        assert!(value.get("output_tokens").is_none());
    }

    #[tokio::test]
    async fn observer_emits_stage_lifecycle_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::spawn(dir.path());
        let ctx = PipelineContext::initial("codegen", "t-1", "C-9");
        sink.stage_started(&ctx, "generate");
        sink.stage_finished(
            &ctx,
            &StageLog {
                stage_name: "generate".to_string(),
                stage_index: 0,
                duration_ms: 3,
                reflections_used: 1,
                state: StageState::Failure("boom".to_string()),
            },
        );
        sink.flush().await;

        let text =
            std::fs::read_to_string(dir.path().join("conversation_logs/C-9.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let finished: LogRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(finished.level, LogLevel::Error);
        assert!(finished.message.contains("boom"));
    }
}
