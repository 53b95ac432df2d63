//! Read-only SQLite registries: versioned prompts and per-pipeline
//! guardrails. Agents load these at startup; nothing here writes.

pub mod guardrails;
pub mod prompts;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("no enabled version for prompt `{0}`")]
    PromptNotFound(String),
}

pub use guardrails::{GuardrailRegistry, GuardrailSpec};
pub use prompts::{PromptRegistry, PromptVersion};

pub(crate) async fn open_pool(path: &std::path::Path) -> Result<sqlx::SqlitePool, RegistryError> {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;
    Ok(pool)
}
