//! Versioned prompt store.
//!
//! Schema (managed by the operational tooling, read here):
//!
//! ```sql
//! CREATE TABLE prompts (
//!     id TEXT PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     description TEXT NOT NULL,
//!     created_at TEXT NOT NULL
//! );
//! CREATE TABLE prompt_versions (
//!     id TEXT PRIMARY KEY,
//!     prompt_id TEXT NOT NULL,
//!     version TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     enabled INTEGER NOT NULL DEFAULT 1,
//!     created_at TEXT NOT NULL
//! );
//! ```

use crate::RegistryError;
use sqlx::{Row, SqlitePool};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PromptVersion {
    pub prompt_name: String,
    pub version: String,
    pub content: String,
}

pub struct PromptRegistry {
    pool: SqlitePool,
}

impl PromptRegistry {
    pub async fn open(path: &Path) -> Result<Self, RegistryError> {
        Ok(Self {
            pool: crate::open_pool(path).await?,
        })
    }

    /// Wrap an existing pool; used by tests that seed their own schema.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The newest enabled version of a prompt.
    pub async fn active(&self, name: &str) -> Result<PromptVersion, RegistryError> {
        let row = sqlx::query(
            "
            SELECT p.name, v.version, v.content
            FROM prompt_versions v
            JOIN prompts p ON p.id = v.prompt_id
            WHERE p.name = ? AND v.enabled = 1
            ORDER BY v.created_at DESC
            LIMIT 1
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(PromptVersion {
                prompt_name: row.get("name"),
                version: row.get("version"),
                content: row.get("content"),
            }),
            None => Err(RegistryError::PromptNotFound(name.to_string())),
        }
    }
}
