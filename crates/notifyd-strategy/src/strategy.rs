//! Send strategies (C13): the default (async) strategy persists a pending
//! row for the scheduler to pick up later; the immediate strategy dispatches
//! synchronously and folds duplicate submissions into the existing row.

use crate::window::apply_window;
use async_trait::async_trait;
use notifyd_common::{
    BatchSendResp, NotifyError, Notification, Result, SendResp, SendResult, SendStatus, SendStrategyType,
};
use notifyd_quota::{QuotaCache, QuotaItem};
use notifyd_sender::Sender;
use notifyd_store::NotificationStore;
use notifyd_template::TemplateCache;
use std::sync::Arc;

#[async_trait]
pub trait SendStrategy: Send + Sync {
    async fn send(&self, notification: Notification, needs_callback: bool) -> Result<SendResp>;
    async fn batch_send(&self, notifications: Vec<Notification>, needs_callback: bool) -> Result<BatchSendResp>;
}

/// Async strategy: computes the window, reserves quota, persists `pending`,
/// and leaves actual delivery to the scheduler.
pub struct DefaultSendStrategy {
    quota: Arc<QuotaCache>,
    notif_store: Arc<dyn NotificationStore>,
}

impl DefaultSendStrategy {
    pub fn new(quota: Arc<QuotaCache>, notif_store: Arc<dyn NotificationStore>) -> Self {
        Self { quota, notif_store }
    }

    async fn persist_one(&self, mut notification: Notification, needs_callback: bool) -> Result<SendResult> {
        apply_window(&mut notification)?;
        notification.status = SendStatus::Pending;
        self.quota.decr(notification.tenant_id, notification.channel, 1).await?;

        let persisted = if needs_callback {
            self.notif_store.create_with_callback(notification).await?.0
        } else {
            self.notif_store.create(notification).await?
        };

        Ok(SendResult { notification_id: persisted.id, status: persisted.status })
    }
}

#[async_trait]
impl SendStrategy for DefaultSendStrategy {
    async fn send(&self, notification: Notification, needs_callback: bool) -> Result<SendResp> {
        let tenant_id = notification.tenant_id;
        let channel = notification.channel;
        match self.persist_one(notification, needs_callback).await {
            Ok(result) => Ok(SendResp { result }),
            Err(err) => {
                self.quota.incr(tenant_id, channel, 1).await.ok();
                Err(err)
            }
        }
    }

    async fn batch_send(&self, notifications: Vec<Notification>, needs_callback: bool) -> Result<BatchSendResp> {
        let items: Vec<QuotaItem> = notifications.iter().map(|n| QuotaItem::new(n.tenant_id, n.channel, 1)).collect();
        self.quota.batch_decr(&items).await?;

        let mut windowed = notifications;
        for n in &mut windowed {
            apply_window(n)?;
            n.status = SendStatus::Pending;
        }

        let persisted = if needs_callback {
            let pairs = self.notif_store.batch_create_with_callback(windowed).await?;
            pairs.into_iter().map(|(n, _callback)| n).collect::<Vec<_>>()
        } else {
            self.notif_store.batch_create(windowed).await?
        };

        let results = persisted.into_iter().map(|n| SendResult { notification_id: n.id, status: n.status }).collect();
        Ok(BatchSendResp { results })
    }
}

/// Immediate strategy: persists `pending`, dispatches synchronously, and
/// folds a `(tenant_id, business_key)` collision into the existing row
/// instead of failing.
pub struct ImmediateSendStrategy {
    quota: Arc<QuotaCache>,
    notif_store: Arc<dyn NotificationStore>,
    sender: Arc<Sender>,
}

impl ImmediateSendStrategy {
    pub fn new(quota: Arc<QuotaCache>, notif_store: Arc<dyn NotificationStore>, sender: Arc<Sender>) -> Self {
        Self { quota, notif_store, sender }
    }
}

#[async_trait]
impl SendStrategy for ImmediateSendStrategy {
    async fn send(&self, mut notification: Notification, _needs_callback: bool) -> Result<SendResp> {
        apply_window(&mut notification)?;
        notification.status = SendStatus::Pending;

        let tenant_id = notification.tenant_id;
        let channel = notification.channel;
        self.quota.decr(tenant_id, channel, 1).await?;

        let (existing_or_new, freshly_created) = match self.notif_store.create_or_get_existing(notification).await {
            Ok(pair) => pair,
            Err(err) => {
                self.quota.incr(tenant_id, channel, 1).await.ok();
                return Err(err);
            }
        };

        if !freshly_created {
            // This call's reservation was never consumed by a fresh insert.
            self.quota.incr(tenant_id, channel, 1).await.ok();

            return match existing_or_new.status {
                SendStatus::Success => Ok(SendResp { result: SendResult { notification_id: existing_or_new.id, status: SendStatus::Success } }),
                SendStatus::Sending => {
                    let mut cas_target = existing_or_new.clone();
                    cas_target.status = SendStatus::Sending;
                    self.notif_store.compare_and_swap_status(&cas_target).await.ok();
                    let result = self.sender.send(cas_target).await?;
                    Ok(SendResp { result })
                }
                _ => Err(NotifyError::FailedToSend(format!(
                    "existing notification {} in non-resumable status",
                    existing_or_new.id
                ))),
            };
        }

        let result = self.sender.send(existing_or_new).await?;
        Ok(SendResp { result })
    }

    async fn batch_send(&self, notifications: Vec<Notification>, needs_callback: bool) -> Result<BatchSendResp> {
        let mut results = Vec::with_capacity(notifications.len());
        for n in notifications {
            let resp = self.send(n, needs_callback).await?;
            results.push(resp.result);
        }
        Ok(BatchSendResp { results })
    }
}

/// Routes by `strategy_config.type`: `immediate` to the immediate
/// strategy, everything else to the default (async) strategy.
pub struct StrategyDispatcher {
    immediate: Arc<ImmediateSendStrategy>,
    default: Arc<DefaultSendStrategy>,
    templates: Arc<TemplateCache>,
}

impl StrategyDispatcher {
    pub fn new(immediate: Arc<ImmediateSendStrategy>, default: Arc<DefaultSendStrategy>, templates: Arc<TemplateCache>) -> Self {
        Self { immediate, default, templates }
    }

    fn is_immediate(notification: &Notification) -> bool {
        matches!(notification.strategy_config.as_ref().map(|c| c.kind), Some(SendStrategyType::Immediate))
    }

    /// Checks the template bundle's approval state before any quota
    /// reservation or persistence happens, so a rejected or stale version
    /// never reaches the store.
    async fn check_template(&self, notification: &Notification) -> Result<()> {
        self.templates.check_usable(notification.template.id, notification.template.version_id).await
    }

    pub async fn send(&self, notification: Notification, needs_callback: bool) -> Result<SendResp> {
        self.check_template(&notification).await?;
        if Self::is_immediate(&notification) {
            self.immediate.send(notification, needs_callback).await
        } else {
            self.default.send(notification, needs_callback).await
        }
    }

    pub async fn batch_send(&self, notifications: Vec<Notification>, needs_callback: bool) -> Result<BatchSendResp> {
        for notification in &notifications {
            self.check_template(notification).await?;
        }

        let (immediate, default): (Vec<_>, Vec<_>) = notifications.into_iter().partition(Self::is_immediate);

        let mut results = Vec::new();
        if !immediate.is_empty() {
            results.extend(self.immediate.batch_send(immediate, needs_callback).await?.results);
        }
        if !default.is_empty() {
            results.extend(self.default.batch_send(default, needs_callback).await?.results);
        }
        Ok(BatchSendResp { results })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use notifyd_common::{Channel, Notification, SendStatus, SendStrategyConfig, Template};
    use std::collections::HashMap;

    pub(crate) fn sample_notification() -> Notification {
        Notification {
            id: 0,
            tenant_id: 1,
            business_key: "k1".to_string(),
            receivers: vec!["+15550100".to_string()],
            channel: Channel::Sms,
            template: Template { id: 1, version_id: 1, params: HashMap::from([("code".to_string(), "123456".to_string())]) },
            status: SendStatus::Prepare,
            scheduled_start_ms: 0,
            scheduled_end_ms: 0,
            version: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
            strategy_config: Some(SendStrategyConfig::immediate()),
        }
    }

    #[test]
    fn sample_notification_validates() {
        assert!(sample_notification().validate().is_ok());
    }
}
