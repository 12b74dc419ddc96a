//! Sender (C14): drives channel delivery for one or many notifications and
//! reconciles the store's terminal status afterward, with a bounded
//! concurrency cap for batch sends.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use notifyd_common::{Notification, Result, SendResult, SendStatus};
use notifyd_provider::ChannelDispatcher;
use notifyd_quota::{QuotaCache, QuotaItem};
use notifyd_store::NotificationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Best-effort delivery-result notifier. Implemented by the callback
/// dispatcher; kept as a port here so the sender doesn't need to depend on
/// that crate's scan/retry machinery.
#[async_trait]
pub trait CallbackTrigger: Send + Sync {
    async fn send_by_notification(&self, notification: &Notification);
    async fn send_by_notifications(&self, notifications: &[Notification]);
}

/// A no-op trigger for deployments or tests with no callback configured.
pub struct NoopCallbackTrigger;

#[async_trait]
impl CallbackTrigger for NoopCallbackTrigger {
    async fn send_by_notification(&self, _notification: &Notification) {}
    async fn send_by_notifications(&self, _notifications: &[Notification]) {}
}

const DEFAULT_BATCH_PARALLELISM: usize = 32;

pub struct Sender {
    channels: Arc<ChannelDispatcher>,
    notif_store: Arc<dyn NotificationStore>,
    quota: Arc<QuotaCache>,
    callback: Arc<dyn CallbackTrigger>,
    parallelism: usize,
}

impl Sender {
    pub fn new(
        channels: Arc<ChannelDispatcher>,
        notif_store: Arc<dyn NotificationStore>,
        quota: Arc<QuotaCache>,
        callback: Arc<dyn CallbackTrigger>,
    ) -> Self {
        Self { channels, notif_store, quota, callback, parallelism: DEFAULT_BATCH_PARALLELISM }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sends one notification, reconciling its store status and refunding
    /// quota on failure before returning the observed result.
    pub async fn send(&self, mut notification: Notification) -> Result<SendResult> {
        match self.channels.send(&notification).await {
            Ok(()) => {
                notification.status = SendStatus::Success;
                self.notif_store.mark_success(&notification).await?;
                self.callback.send_by_notification(&notification).await;
                metrics::counter!("sender.sends.success_total").increment(1);
                Ok(SendResult { notification_id: notification.id, status: SendStatus::Success })
            }
            Err(err) => {
                error!(notification_id = notification.id, error = %err, "channel send failed");
                notification.status = SendStatus::Failure;
                self.notif_store.mark_failure(&notification).await?;
                self.quota.incr(notification.tenant_id, notification.channel, 1).await.ok();
                self.callback.send_by_notification(&notification).await;
                metrics::counter!("sender.sends.failure_total").increment(1);
                Ok(SendResult { notification_id: notification.id, status: SendStatus::Failure })
            }
        }
    }

    /// Fans out sends across `notifications` with a bounded concurrency
    /// cap, reconciles store status in one batch update per status
    /// bucket, and best-effort triggers callbacks for the whole batch.
    pub async fn batch_send(&self, notifications: Vec<Notification>) -> Result<Vec<SendResult>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let results: Vec<(u64, SendStatus)> = stream::iter(notifications.iter().cloned())
            .map(|n| async move {
                match self.channels.send(&n).await {
                    Ok(()) => (n.id, SendStatus::Success),
                    Err(err) => {
                        error!(notification_id = n.id, error = %err, "channel send failed in batch");
                        (n.id, SendStatus::Failure)
                    }
                }
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut success_ids = Vec::new();
        let mut failure_ids = Vec::new();
        for (id, status) in &results {
            match status {
                SendStatus::Success => success_ids.push(*id),
                _ => failure_ids.push(*id),
            }
        }

        self.notif_store.batch_update_status(&success_ids, &failure_ids).await?;
        metrics::counter!("sender.sends.success_total").increment(success_ids.len() as u64);
        metrics::counter!("sender.sends.failure_total").increment(failure_ids.len() as u64);

        if !failure_ids.is_empty() {
            let by_id: HashMap<u64, &Notification> = notifications.iter().map(|n| (n.id, n)).collect();
            let refunds: Vec<QuotaItem> = failure_ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .map(|n| QuotaItem::new(n.tenant_id, n.channel, 1))
                .collect();
            self.quota.batch_incr(&refunds).await.ok();
        }

        self.callback.send_by_notifications(&notifications).await;

        Ok(results.into_iter().map(|(notification_id, status)| SendResult { notification_id, status }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyd_common::{Channel, Template};
    use std::collections::HashMap as StdHashMap;

    fn sample_notification(id: u64) -> Notification {
        Notification {
            id,
            tenant_id: 1,
            business_key: format!("k{id}"),
            receivers: vec!["+15550100".to_string()],
            channel: Channel::Sms,
            template: Template { id: 1, version_id: 1, params: StdHashMap::from([("a".to_string(), "b".to_string())]) },
            status: SendStatus::Pending,
            scheduled_start_ms: 0,
            scheduled_end_ms: 0,
            version: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
            strategy_config: None,
        }
    }

    #[test]
    fn sample_notification_has_distinct_keys() {
        assert_ne!(sample_notification(1).business_key, sample_notification(2).business_key);
    }
}
