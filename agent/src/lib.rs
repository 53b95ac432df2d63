//! Shared wiring for the trellis agent binaries.

pub mod logstats;
pub mod payloads;

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis_contract::{Guardrail, ModelExecutor};
use trellis_registry::{GuardrailRegistry, RegistryError};
use trellis_runtime::RuntimeConfig;
use trellis_tools::ModelGuardrail;

/// Broker and observability knobs shared by every agent binary.
#[derive(Debug, Args)]
pub struct AgentArgs {
    #[arg(long, env = "TRELLIS_NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    #[arg(long, env = "TRELLIS_LOG_ROOT", default_value = ".")]
    pub log_root: PathBuf,

    #[arg(long, env = "TRELLIS_MODEL", default_value = "deepseek-chat")]
    pub model: String,

    #[arg(long, env = "TRELLIS_PREFETCH", default_value_t = 10)]
    pub prefetch: usize,
}

impl AgentArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::from_env();
        config.nats_url = self.nats_url.clone();
        config.log_root = self.log_root.clone();
        config.prefetch = self.prefetch;
        config
    }
}

/// Load the `code-execution` guardrails and bind them to a model.
///
/// A missing or unreadable guardrail database is an error, never an empty
/// guard list: generated code must not run with its only gate silently
/// absent. An empty list is legal only when a healthy registry says so.
pub async fn load_code_execution_guardrails(
    path: &Path,
    model: Arc<dyn ModelExecutor>,
    model_id: &str,
) -> Result<Vec<Arc<dyn Guardrail>>, RegistryError> {
    let registry = GuardrailRegistry::open(path).await?;
    let specs = registry.enabled_for("code-execution").await?;
    Ok(ModelGuardrail::from_specs(specs, model, model_id))
}

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_contract::testing::ScriptedModel;

    #[tokio::test]
    async fn unavailable_guardrail_registry_is_an_error_not_an_empty_list() {
        let model: Arc<dyn ModelExecutor> = Arc::new(ScriptedModel::replies(["PASS"]));
        let missing = Path::new("definitely/missing/guardrails.db");
        match load_code_execution_guardrails(missing, model, "test-model").await {
            Err(RegistryError::Db(_)) => {}
            other => panic!("expected a registry error, got {:?}", other.map(|g| g.len())),
        }
    }
}
