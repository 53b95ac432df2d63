//! Runtime knobs, overridable from the environment.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Broker address.
    pub nats_url: String,
    /// Upper bound on concurrently in-flight messages per agent.
    pub prefetch: usize,
    /// Connection attempts before giving up at startup.
    pub connect_attempts: u32,
    /// Fixed spacing between connection attempts.
    pub connect_delay: Duration,
    /// How long an empty pull waits before the next one.
    pub idle_delay: Duration,
    /// Directory holding `agent_logs/` and `conversation_logs/`.
    pub log_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            prefetch: 10,
            connect_attempts: 5,
            connect_delay: Duration::from_secs(2),
            idle_delay: Duration::from_millis(250),
            log_root: PathBuf::from("."),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `TRELLIS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nats_url: env_string("TRELLIS_NATS_URL").unwrap_or(defaults.nats_url),
            prefetch: env_parse("TRELLIS_PREFETCH").unwrap_or(defaults.prefetch),
            connect_attempts: env_parse("TRELLIS_CONNECT_ATTEMPTS")
                .unwrap_or(defaults.connect_attempts),
            connect_delay: env_parse("TRELLIS_CONNECT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_delay),
            idle_delay: env_parse("TRELLIS_IDLE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_delay),
            log_root: env_string("TRELLIS_LOG_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_root),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.parse().ok()
}
