//! Result callback dispatcher (C16): scans pending callback-log rows
//! across every storage shard and delivers each to the tenant's
//! registered endpoint, backing off per the tenant's retry policy on
//! failure.

use crate::registry::ServiceRegistry;
use async_trait::async_trait;
use notifyd_bizconf::BizConfCache;
use notifyd_common::{CallbackLog, CallbackStatus, Notification, SendResult};
use notifyd_sender::CallbackTrigger;
use notifyd_sharding::HashStrategy;
use notifyd_store::{CallbackLogStore, CallbackLogUpdate, NotificationStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

#[derive(Serialize)]
struct CallbackBody<'a> {
    notification_id: u64,
    original_request: &'a Notification,
    result: SendResult,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

pub struct CallbackDispatcher {
    log_store: Arc<dyn CallbackLogStore>,
    notif_store: Arc<dyn NotificationStore>,
    bizconf: Arc<BizConfCache>,
    registry: Arc<dyn ServiceRegistry>,
    strategy: HashStrategy,
    http: reqwest::Client,
    batch_size: i64,
}

impl CallbackDispatcher {
    pub fn new(
        log_store: Arc<dyn CallbackLogStore>,
        notif_store: Arc<dyn NotificationStore>,
        bizconf: Arc<BizConfCache>,
        registry: Arc<dyn ServiceRegistry>,
        strategy: HashStrategy,
        batch_size: i64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client configuration is static and valid");
        Self { log_store, notif_store, bizconf, registry, strategy, http, batch_size }
    }

    /// Scans every shard once for callback logs due at or before `start_time_ms`.
    pub async fn run_once(&self, start_time_ms: i64) {
        for shard in self.strategy.broadcast() {
            let mut start_id = 0u64;
            loop {
                let (logs, next_start_id) = match self.log_store.find(shard, start_time_ms, start_id, self.batch_size).await {
                    Ok(page) => page,
                    Err(err) => {
                        error!(error = %err, db_suffix = shard.db_suffix, table_suffix = shard.table_suffix, "callback log scan failed");
                        break;
                    }
                };
                if logs.is_empty() {
                    break;
                }

                self.process_logs(shard, &logs).await;

                if next_start_id == 0 {
                    break;
                }
                start_id = next_start_id;
            }
        }
    }

    async fn process_logs(&self, shard: notifyd_common::ShardTarget, logs: &[CallbackLog]) {
        let ids: Vec<u64> = logs.iter().map(|log| log.notification_id).collect();
        let notifications = match self.notif_store.get_map_by_ids(&ids).await {
            Ok(map) => map,
            Err(err) => {
                error!(error = %err, "failed to load notifications for callback batch");
                return;
            }
        };

        let mut updates = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(notification) = notifications.get(&log.notification_id) else {
                warn!(notification_id = log.notification_id, "callback log has no matching notification, marking failed");
                updates.push(CallbackLogUpdate {
                    notification_id: log.notification_id,
                    status: CallbackStatus::Failure,
                    retried_times: log.retried_times,
                    next_retry_at_ms: log.next_retry_at_ms,
                });
                continue;
            };
            updates.push(self.deliver_one(log, notification).await);
        }

        if let Err(err) = self.log_store.batch_update(shard, &updates).await {
            error!(error = %err, "failed to persist callback log updates");
        }
    }

    async fn deliver_one(&self, log: &CallbackLog, notification: &Notification) -> CallbackLogUpdate {
        let conf = match self.bizconf.get(log.tenant_id).await {
            Ok(conf) => conf.callback_conf,
            Err(err) => {
                error!(error = %err, tenant_id = log.tenant_id, "failed to load tenant config for callback");
                None
            }
        };

        let Some(conf) = conf else {
            return CallbackLogUpdate {
                notification_id: log.notification_id,
                status: CallbackStatus::Failure,
                retried_times: log.retried_times,
                next_retry_at_ms: log.next_retry_at_ms,
            };
        };

        let Some(base_url) = self.registry.resolve(&conf.service_name) else {
            warn!(service = %conf.service_name, "callback service not found in registry");
            return self.reschedule_or_fail(log, &conf.retry_policy);
        };

        let body = CallbackBody { notification_id: log.notification_id, original_request: notification, result: SendResult { notification_id: log.notification_id, status: notification.status } };

        match self.http.post(&base_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                metrics::counter!("callback.deliveries.success_total").increment(1);
                CallbackLogUpdate {
                    notification_id: log.notification_id,
                    status: CallbackStatus::Success,
                    retried_times: log.retried_times,
                    next_retry_at_ms: log.next_retry_at_ms,
                }
            }
            Ok(response) => {
                warn!(notification_id = log.notification_id, status = %response.status(), "callback endpoint returned failure");
                metrics::counter!("callback.deliveries.retry_total").increment(1);
                self.reschedule_or_fail(log, &conf.retry_policy)
            }
            Err(err) => {
                warn!(notification_id = log.notification_id, error = %err, "callback request failed");
                metrics::counter!("callback.deliveries.retry_total").increment(1);
                self.reschedule_or_fail(log, &conf.retry_policy)
            }
        }
    }

    fn reschedule_or_fail(&self, log: &CallbackLog, retry_policy: &notifyd_common::RetryPolicy) -> CallbackLogUpdate {
        match retry_policy.next(log.retried_times) {
            Some(delay_ms) => CallbackLogUpdate {
                notification_id: log.notification_id,
                status: CallbackStatus::Pending,
                retried_times: log.retried_times + 1,
                next_retry_at_ms: now_millis() + delay_ms,
            },
            None => CallbackLogUpdate {
                notification_id: log.notification_id,
                status: CallbackStatus::Failure,
                retried_times: log.retried_times,
                next_retry_at_ms: log.next_retry_at_ms,
            },
        }
    }

    async fn deliver_by_notification(&self, notification: &Notification) {
        let conf = match self.bizconf.get(notification.tenant_id).await {
            Ok(conf) => conf.callback_conf,
            Err(_) => return,
        };
        let Some(conf) = conf else { return };
        let Some(base_url) = self.registry.resolve(&conf.service_name) else { return };

        let body = CallbackBody {
            notification_id: notification.id,
            original_request: notification,
            result: SendResult { notification_id: notification.id, status: notification.status },
        };
        if let Err(err) = self.http.post(&base_url).json(&body).send().await {
            warn!(notification_id = notification.id, error = %err, "best-effort callback delivery failed");
        }
    }
}

#[async_trait]
impl CallbackTrigger for CallbackDispatcher {
    async fn send_by_notification(&self, notification: &Notification) {
        self.deliver_by_notification(notification).await;
    }

    async fn send_by_notifications(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.deliver_by_notification(notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyd_common::RetryPolicy;

    #[test]
    fn reschedule_uses_fixed_interval_policy() {
        let policy = RetryPolicy::FixedInterval { interval_ms: 1_000, max_times: 3 };
        assert_eq!(policy.next(0), Some(1_000));
        assert_eq!(policy.next(3), None);
    }
}
