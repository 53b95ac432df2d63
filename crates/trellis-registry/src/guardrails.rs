//! Per-pipeline guardrail store.
//!
//! Schema (managed by the operational tooling, read here):
//!
//! ```sql
//! CREATE TABLE pipelines (
//!     id TEXT PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     description TEXT NOT NULL,
//!     allowed_scope TEXT NOT NULL,
//!     created_at TEXT NOT NULL
//! );
//! CREATE TABLE guardrails (
//!     id TEXT PRIMARY KEY,
//!     pipeline_id TEXT NOT NULL REFERENCES pipelines(id),
//!     name TEXT NOT NULL,
//!     description TEXT NOT NULL,
//!     check_prompt TEXT NOT NULL,
//!     enabled INTEGER NOT NULL DEFAULT 1,
//!     created_at TEXT NOT NULL
//! );
//! ```

use crate::RegistryError;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// One enabled guardrail: the check prompt is rendered over the candidate
/// text and put to a model.
#[derive(Debug, Clone)]
pub struct GuardrailSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub check_prompt: String,
}

pub struct GuardrailRegistry {
    pool: SqlitePool,
}

impl GuardrailRegistry {
    pub async fn open(path: &Path) -> Result<Self, RegistryError> {
        Ok(Self {
            pool: crate::open_pool(path).await?,
        })
    }

    /// Wrap an existing pool; used by tests that seed their own schema.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enabled guardrails for a pipeline, in creation order. An unknown
    /// pipeline yields an empty list, which the guard stage treats as
    /// identity.
    pub async fn enabled_for(&self, pipeline: &str) -> Result<Vec<GuardrailSpec>, RegistryError> {
        let rows = sqlx::query(
            "
            SELECT g.id, g.name, g.description, g.check_prompt
            FROM guardrails g
            JOIN pipelines p ON p.id = g.pipeline_id
            WHERE p.name = ? AND g.enabled = 1
            ORDER BY g.created_at ASC
            ",
        )
        .bind(pipeline)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| GuardrailSpec {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                check_prompt: row.get("check_prompt"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn seeded_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                allowed_scope TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE guardrails (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL REFERENCES pipelines(id),
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                check_prompt TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO pipelines VALUES
             ('pl1', 'code-execution', 'generated code about to run', 'local sandbox', '2025-01-01')",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, name, prompt, enabled, created) in [
            ("g1", "no-filesystem-writes", "Does this code write files?", 1, "2025-01-02"),
            ("g2", "no-network", "Does this code open sockets?", 1, "2025-01-03"),
            ("g3", "retired-check", "old", 0, "2025-01-04"),
        ] {
            sqlx::query(
                "INSERT INTO guardrails VALUES (?, 'pl1', ?, 'safety check', ?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(prompt)
            .bind(enabled)
            .bind(created)
            .execute(&pool)
            .await
            .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn enabled_guardrails_come_back_in_creation_order() {
        let registry = GuardrailRegistry::from_pool(seeded_pool().await);
        let guards = registry.enabled_for("code-execution").await.unwrap();
        let names: Vec<&str> = guards.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["no-filesystem-writes", "no-network"]);
    }

    #[tokio::test]
    async fn unknown_pipeline_yields_an_empty_list() {
        let registry = GuardrailRegistry::from_pool(seeded_pool().await);
        let guards = registry.enabled_for("no-such-pipeline").await.unwrap();
        assert!(guards.is_empty());
    }
}
