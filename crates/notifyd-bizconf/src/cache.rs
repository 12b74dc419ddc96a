//! Two-tier read-through cache in front of the authoritative `BizConfStore`
//! (C8): local in-process tier first, then Redis, then the store. A hit at
//! a lower tier best-effort populates the tiers above it — a populate
//! failure is logged and otherwise ignored, never surfaced to the caller.

use crate::store::BizConfStore;
use dashmap::DashMap;
use notifyd_common::{BizConf, NotifyError, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

fn remote_key(tenant_id: u64) -> String {
    format!("bizconf:{tenant_id}")
}

struct Entry {
    conf: BizConf,
    expires_at: Instant,
}

pub struct BizConfCache {
    local: DashMap<u64, Entry>,
    remote: Option<ConnectionManager>,
    store: Arc<dyn BizConfStore>,
    ttl: Duration,
}

impl BizConfCache {
    pub fn new(store: Arc<dyn BizConfStore>, remote: Option<ConnectionManager>) -> Self {
        Self { local: DashMap::new(), remote, store, ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn get(&self, tenant_id: u64) -> Result<BizConf> {
        if let Some(entry) = self.local.get(&tenant_id) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.conf.clone());
            }
        }

        if let Some(conf) = self.get_from_remote(tenant_id).await {
            self.populate_local(tenant_id, conf.clone());
            return Ok(conf);
        }

        match self.store.get_by_tenant_id(tenant_id).await? {
            Some(conf) => {
                self.populate_local(tenant_id, conf.clone());
                self.populate_remote(tenant_id, &conf).await;
                Ok(conf)
            }
            None => Err(NotifyError::BizIdNotFound(tenant_id)),
        }
    }

    fn populate_local(&self, tenant_id: u64, conf: BizConf) {
        self.local.insert(tenant_id, Entry { conf, expires_at: Instant::now() + self.ttl });
    }

    async fn get_from_remote(&self, tenant_id: u64) -> Option<BizConf> {
        let mut conn = self.remote.clone()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(remote_key(tenant_id))
            .query_async(&mut conn)
            .await
            .map_err(|err| warn!(tenant_id, error = %err, "bizconf remote tier read failed"))
            .ok()?;

        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(conf) => Some(conf),
            Err(err) => {
                warn!(tenant_id, error = %err, "bizconf remote tier held unparseable value");
                None
            }
        }
    }

    async fn populate_remote(&self, tenant_id: u64, conf: &BizConf) {
        let Some(mut conn) = self.remote.clone() else {
            return;
        };
        let Ok(raw) = serde_json::to_string(conf) else {
            return;
        };
        if let Err(err) = redis::cmd("SET")
            .arg(remote_key(tenant_id))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(tenant_id, error = %err, "bizconf remote tier populate failed");
        }
    }

    /// Drops the local entry for a tenant, e.g. after an admin-side update
    /// notification. The remote tier is left to expire naturally.
    pub fn invalidate_local(&self, tenant_id: u64) {
        self.local.remove(&tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBizConfStore;
    use notifyd_common::{ChannelConf, QuotaConf};

    fn sample_conf(tenant_id: u64) -> BizConf {
        BizConf {
            id: tenant_id,
            owner_id: tenant_id,
            owner_type: "tenant".to_string(),
            channel_conf: ChannelConf { channels: vec![], retry_policy: None },
            tx_notif_conf: None,
            rate_limit: 100,
            quota_conf: QuotaConf { daily: None, monthly: None },
            callback_conf: None,
        }
    }

    #[tokio::test]
    async fn hits_store_then_populates_local_tier() {
        let store = Arc::new(InMemoryBizConfStore::new());
        store.seed(sample_conf(1));
        let cache = BizConfCache::new(store, None);

        let conf = cache.get(1).await.unwrap();
        assert_eq!(conf.owner_id, 1);
        assert!(cache.local.contains_key(&1));
    }

    #[tokio::test]
    async fn unknown_tenant_reports_not_found() {
        let store = Arc::new(InMemoryBizConfStore::new());
        let cache = BizConfCache::new(store, None);

        let err = cache.get(99).await.unwrap_err();
        assert!(matches!(err, NotifyError::BizIdNotFound(99)));
    }

    #[tokio::test]
    async fn invalidate_local_forces_a_refetch() {
        let store = Arc::new(InMemoryBizConfStore::new());
        store.seed(sample_conf(2));
        let cache = BizConfCache::new(store, None);

        cache.get(2).await.unwrap();
        cache.invalidate_local(2);
        assert!(!cache.local.contains_key(&2));
        cache.get(2).await.unwrap();
        assert!(cache.local.contains_key(&2));
    }
}
