//! Authoritative storage port for `BizConf`. Owned, in the real system, by
//! an admin subsystem outside this core's write path — the core only ever
//! reads through this trait.

use async_trait::async_trait;
use notifyd_common::{BizConf, Result};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait BizConfStore: Send + Sync {
    async fn get_by_tenant_id(&self, tenant_id: u64) -> Result<Option<BizConf>>;
}

/// Reference implementation for tests and local development: an
/// in-memory map seeded up front, never written by the core.
#[derive(Default)]
pub struct InMemoryBizConfStore {
    configs: RwLock<HashMap<u64, BizConf>>,
}

impl InMemoryBizConfStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, conf: BizConf) {
        self.configs.write().expect("lock poisoned").insert(conf.owner_id, conf);
    }
}

#[async_trait]
impl BizConfStore for InMemoryBizConfStore {
    async fn get_by_tenant_id(&self, tenant_id: u64) -> Result<Option<BizConf>> {
        Ok(self.configs.read().expect("lock poisoned").get(&tenant_id).cloned())
    }
}

/// Postgres-backed authoritative store: one row per tenant, config stored
/// as a `jsonb` blob so the admin subsystem's schema doesn't need to
/// mirror every nested field as its own column.
pub struct PostgresBizConfStore {
    pool: PgPool,
}

impl PostgresBizConfStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS biz_conf (
                tenant_id BIGINT PRIMARY KEY,
                config JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BizConfStore for PostgresBizConfStore {
    async fn get_by_tenant_id(&self, tenant_id: u64) -> Result<Option<BizConf>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT config FROM biz_conf WHERE tenant_id = $1")
                .bind(tenant_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((config,)) => Ok(Some(serde_json::from_value(config)?)),
            None => Ok(None),
        }
    }
}
