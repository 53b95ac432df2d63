//! Broker-driven runtime for trellis agents: connection management, the
//! per-agent consumer loop, and the JSONL observability sinks.

pub mod broker;
pub mod config;
pub mod observability;
pub mod runner;

pub use broker::{Broker, BrokerError, TaskConsumer};
pub use config::RuntimeConfig;
pub use observability::{
    observer_handle, JsonlSink, LogLevel, LogRecord, LogSource, StageTiming,
};
pub use runner::{
    outbound_envelope, run_agent, run_agent_until, run_envelope, terminal_block, RuntimeError,
};
