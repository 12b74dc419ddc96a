//! Two-tier read-through cache in front of the authoritative `TemplateStore`
//! (C9/C11 support): local in-process tier first, then Redis, then the
//! store. A hit at a lower tier best-effort populates the tiers above it —
//! a populate failure is logged and otherwise ignored, never surfaced to
//! the caller.

use crate::store::TemplateStore;
use dashmap::DashMap;
use notifyd_common::{ChannelTpl, NotifyError, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

fn remote_key(template_id: u64) -> String {
    format!("tpl:{template_id}")
}

struct Entry {
    tpl: ChannelTpl,
    expires_at: Instant,
}

pub struct TemplateCache {
    local: DashMap<u64, Entry>,
    remote: Option<ConnectionManager>,
    store: Arc<dyn TemplateStore>,
    ttl: Duration,
}

impl TemplateCache {
    pub fn new(store: Arc<dyn TemplateStore>, remote: Option<ConnectionManager>) -> Self {
        Self { local: DashMap::new(), remote, store, ttl: DEFAULT_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn get_bundle(&self, template_id: u64) -> Result<ChannelTpl> {
        if let Some(entry) = self.local.get(&template_id) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.tpl.clone());
            }
        }

        if let Some(tpl) = self.get_from_remote(template_id).await {
            self.populate_local(template_id, tpl.clone());
            return Ok(tpl);
        }

        match self.store.get_by_id(template_id).await? {
            Some(tpl) => {
                self.populate_local(template_id, tpl.clone());
                self.populate_remote(template_id, &tpl).await;
                Ok(tpl)
            }
            None => Err(NotifyError::ChannelTplNotFound(template_id)),
        }
    }

    /// Checks that `version_id` exists on `template_id`, is the template's
    /// currently activated version, and has passed approval.
    pub async fn check_usable(&self, template_id: u64, version_id: u64) -> Result<()> {
        let bundle = self.get_bundle(template_id).await?;

        if bundle.version(version_id).is_none() {
            return Err(NotifyError::ChannelTplVersionNotFound(version_id));
        }
        if !bundle.is_usable(version_id) {
            return Err(NotifyError::NotApprovedTplVersion(version_id));
        }
        Ok(())
    }

    fn populate_local(&self, template_id: u64, tpl: ChannelTpl) {
        self.local.insert(template_id, Entry { tpl, expires_at: Instant::now() + self.ttl });
    }

    async fn get_from_remote(&self, template_id: u64) -> Option<ChannelTpl> {
        let mut conn = self.remote.clone()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(remote_key(template_id))
            .query_async(&mut conn)
            .await
            .map_err(|err| warn!(template_id, error = %err, "template remote tier read failed"))
            .ok()?;

        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(tpl) => Some(tpl),
            Err(err) => {
                warn!(template_id, error = %err, "template remote tier held unparseable value");
                None
            }
        }
    }

    async fn populate_remote(&self, template_id: u64, tpl: &ChannelTpl) {
        let Some(mut conn) = self.remote.clone() else {
            return;
        };
        let Ok(raw) = serde_json::to_string(tpl) else {
            return;
        };
        if let Err(err) = redis::cmd("SET")
            .arg(remote_key(template_id))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(template_id, error = %err, "template remote tier populate failed");
        }
    }

    /// Drops the local entry for a template, e.g. after an admin-side
    /// approval change. The remote tier is left to expire naturally.
    pub fn invalidate_local(&self, template_id: u64) {
        self.local.remove(&template_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTemplateStore;
    use notifyd_common::{AuditStatus, TemplateVersion};

    fn sample_bundle(id: u64) -> ChannelTpl {
        ChannelTpl {
            id,
            activated_version_id: 3,
            versions: vec![
                TemplateVersion { version_id: 2, audit_status: AuditStatus::Rejected },
                TemplateVersion { version_id: 3, audit_status: AuditStatus::Approved },
            ],
        }
    }

    #[tokio::test]
    async fn activated_and_approved_version_is_usable() {
        let store = Arc::new(InMemoryTemplateStore::new());
        store.seed(sample_bundle(7));
        let cache = TemplateCache::new(store, None);

        assert!(cache.check_usable(7, 3).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_template_reports_not_found() {
        let store = Arc::new(InMemoryTemplateStore::new());
        let cache = TemplateCache::new(store, None);

        let err = cache.check_usable(99, 1).await.unwrap_err();
        assert!(matches!(err, NotifyError::ChannelTplNotFound(99)));
    }

    #[tokio::test]
    async fn unknown_version_reports_version_not_found() {
        let store = Arc::new(InMemoryTemplateStore::new());
        store.seed(sample_bundle(7));
        let cache = TemplateCache::new(store, None);

        let err = cache.check_usable(7, 99).await.unwrap_err();
        assert!(matches!(err, NotifyError::ChannelTplVersionNotFound(99)));
    }

    #[tokio::test]
    async fn approved_but_not_activated_version_is_not_usable() {
        let store = Arc::new(InMemoryTemplateStore::new());
        store.seed(ChannelTpl {
            id: 7,
            activated_version_id: 3,
            versions: vec![TemplateVersion { version_id: 3, audit_status: AuditStatus::Approved }, TemplateVersion { version_id: 4, audit_status: AuditStatus::Approved }],
        });
        let cache = TemplateCache::new(store, None);

        let err = cache.check_usable(7, 4).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotApprovedTplVersion(4)));
    }

    #[tokio::test]
    async fn rejected_activated_version_is_not_usable() {
        let store = Arc::new(InMemoryTemplateStore::new());
        store.seed(ChannelTpl {
            id: 7,
            activated_version_id: 2,
            versions: vec![TemplateVersion { version_id: 2, audit_status: AuditStatus::Rejected }],
        });
        let cache = TemplateCache::new(store, None);

        let err = cache.check_usable(7, 2).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotApprovedTplVersion(2)));
    }
}
