//! Command-line submitter: publishes a request to the preprocessor and
//! optionally tails the conversation log until the terminal answer lands.

use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use trellis_agents::payloads::SubmitRequest;
use trellis_agents::init_tracing;
use trellis_contract::{encode_payload, task_stream, Envelope, PayloadType};
use trellis_runtime::{Broker, JsonlSink, LogLevel, LogRecord, LogSource, RuntimeConfig};
use uuid::Uuid;

#[derive(Debug, Parser)]
struct Args {
    /// The request to submit, e.g. "sum the numbers from 1 to 100".
    request: Vec<String>,

    #[arg(long, env = "TRELLIS_NATS_URL", default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    #[arg(long, env = "TRELLIS_LOG_ROOT", default_value = ".")]
    log_root: PathBuf,

    /// Reuse an existing conversation id instead of minting one.
    #[arg(long)]
    conversation_id: Option<String>,

    /// Tail the conversation log until the terminal answer arrives.
    #[arg(long)]
    watch: bool,

    /// How long `--watch` waits before giving up.
    #[arg(long, default_value_t = 120)]
    watch_timeout_seconds: u64,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    let request = args.request.join(" ");
    if request.trim().is_empty() {
        eprintln!("nothing to submit");
        std::process::exit(2);
    }

    let conversation_id = args
        .conversation_id
        .clone()
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let trace_id = Uuid::now_v7().to_string();

    let config = RuntimeConfig {
        nats_url: args.nats_url.clone(),
        log_root: args.log_root.clone(),
        ..RuntimeConfig::from_env()
    };
    let broker = Broker::connect(&config).await.expect("broker unavailable");
    let stream = task_stream("preprocessor");
    broker
        .ensure_task_stream(&stream)
        .await
        .expect("failed to declare the preprocessor stream");

    let envelope = Envelope::new(
        "submit",
        "preprocessor",
        &trace_id,
        &conversation_id,
        PayloadType::Normal,
        encode_payload(&SubmitRequest {
            request: request.clone(),
        }),
    );
    let encoded = envelope.encode().expect("envelope encoding failed");
    broker
        .publish(&stream, encoded)
        .await
        .expect("publish failed");

    let sink = JsonlSink::spawn(&config.log_root);
    sink.emit(LogRecord::now(
        "submitted",
        &conversation_id,
        LogLevel::Info,
        LogSource::Submit,
        format!("submitted: {request}"),
    ));
    sink.flush().await;

    println!("conversation: {conversation_id}");

    if args.watch {
        watch_conversation(
            &config.log_root,
            &conversation_id,
            Duration::from_secs(args.watch_timeout_seconds),
        )
        .await;
    }
}

/// Tail `conversation_logs/<id>.jsonl`, printing records as they land, until
/// the terminal record or the deadline. The cursor lives here, owned by the
/// submitter; there is no shared cache.
async fn watch_conversation(log_root: &PathBuf, conversation_id: &str, timeout: Duration) {
    let path = log_root
        .join("conversation_logs")
        .join(format!("{conversation_id}.jsonl"));
    let deadline = Instant::now() + timeout;
    let mut seen = 0usize;

    while Instant::now() < deadline {
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            let lines: Vec<&str> = text.lines().collect();
            for line in &lines[seen..] {
                let Ok(record) = serde_json::from_str::<LogRecord>(line) else {
                    continue;
                };
                let agent = record.agent_name.as_deref().unwrap_or("-");
                println!("[{}] {agent}: {}", record.timestamp, record.message);
                if record.record_type == "terminal_output" {
                    return;
                }
            }
            seen = lines.len();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    eprintln!("timed out waiting for the terminal answer");
}
