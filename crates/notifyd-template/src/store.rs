//! Authoritative storage port for the channel template bundle. Owned, in
//! the real system, by an admin subsystem's authoring/approval workflow
//! outside this core's write path — the core only ever reads through this
//! trait.

use async_trait::async_trait;
use notifyd_common::{ChannelTpl, Result};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_by_id(&self, template_id: u64) -> Result<Option<ChannelTpl>>;
}

/// Reference implementation for tests and local development: an
/// in-memory map seeded up front, never written by the core.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<u64, ChannelTpl>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, tpl: ChannelTpl) {
        self.templates.write().expect("lock poisoned").insert(tpl.id, tpl);
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_by_id(&self, template_id: u64) -> Result<Option<ChannelTpl>> {
        Ok(self.templates.read().expect("lock poisoned").get(&template_id).cloned())
    }
}

/// Postgres-backed authoritative store: one row per template, versions
/// stored as a `jsonb` blob so the admin subsystem's authoring schema
/// doesn't need to mirror every nested field as its own column.
pub struct PostgresTemplateStore {
    pool: PgPool,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channel_tpl (
                template_id BIGINT PRIMARY KEY,
                activated_version_id BIGINT NOT NULL,
                versions JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for PostgresTemplateStore {
    async fn get_by_id(&self, template_id: u64) -> Result<Option<ChannelTpl>> {
        let row: Option<(i64, serde_json::Value)> =
            sqlx::query_as("SELECT activated_version_id, versions FROM channel_tpl WHERE template_id = $1")
                .bind(template_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((activated_version_id, versions)) => Ok(Some(ChannelTpl {
                id: template_id,
                activated_version_id: activated_version_id as u64,
                versions: serde_json::from_value(versions)?,
            })),
            None => Ok(None),
        }
    }
}
