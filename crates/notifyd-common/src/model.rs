//! Core domain types: Notification, CallbackLog, BizConf, retry policy,
//! and the tagged send-strategy configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A physical (database, table) pair a notification's key hashes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardTarget {
    pub db_suffix: u64,
    pub table_suffix: u64,
}

impl ShardTarget {
    pub fn db_name(&self, db_prefix: &str) -> String {
        format!("{db_prefix}_{}", self.db_suffix)
    }

    pub fn table_name(&self, table_prefix: &str) -> String {
        format!("{table_prefix}_{}", self.table_suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::InApp => "in-app",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "in-app" | "app" => Ok(Channel::InApp),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: u64,
    pub version_id: u64,
    pub params: HashMap<String, String>,
}

impl Template {
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("template.id must be > 0".into());
        }
        if self.version_id == 0 {
            return Err("template.version_id must be > 0".into());
        }
        if self.params.is_empty() {
            return Err("template.params must not be empty".into());
        }
        Ok(())
    }
}

/// Approval state of a single template version, set by the admin
/// subsystem's authoring workflow (out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub version_id: u64,
    pub audit_status: AuditStatus,
}

/// The template bundle (ChannelTpl + its versions) as read at send time.
/// A version is usable only when it is both approved and the one the
/// template currently has activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTpl {
    pub id: u64,
    pub activated_version_id: u64,
    pub versions: Vec<TemplateVersion>,
}

impl ChannelTpl {
    pub fn version(&self, version_id: u64) -> Option<&TemplateVersion> {
        self.versions.iter().find(|v| v.version_id == version_id)
    }

    pub fn is_usable(&self, version_id: u64) -> bool {
        self.activated_version_id == version_id
            && self.version(version_id).is_some_and(|v| v.audit_status == AuditStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Prepare,
    Pending,
    Sending,
    Success,
    Failure,
    Canceled,
}

impl SendStatus {
    /// A success/failure row is terminal: no further transition is valid.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendStatus::Success | SendStatus::Failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SendStrategyType {
    Immediate,
    Delayed,
    Scheduled,
    TimeWindow,
    Deadline,
}

/// The caller-supplied strategy configuration, carried on the notification
/// until the strategy dispatcher computes a concrete window from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendStrategyConfig {
    #[serde(rename = "type")]
    pub kind: SendStrategyType,
    /// Required for `delayed`: milliseconds to add to `now`.
    pub delay_ms: Option<i64>,
    /// Required for `scheduled`: when the scheduled window starts, before
    /// the 3s lead-time subtraction.
    pub schedule_at_ms: Option<i64>,
    /// Required for `time_window`: window start.
    pub start_ms: Option<i64>,
    /// Required for `time_window`: window end.
    pub end_ms: Option<i64>,
    /// Required for `deadline` and `scheduled`: the absolute deadline.
    pub deadline_ms: Option<i64>,
}

impl SendStrategyConfig {
    pub fn immediate() -> Self {
        Self {
            kind: SendStrategyType::Immediate,
            delay_ms: None,
            schedule_at_ms: None,
            start_ms: None,
            end_ms: None,
            deadline_ms: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            SendStrategyType::Immediate => Ok(()),
            SendStrategyType::Delayed => {
                if self.delay_ms.unwrap_or(0) <= 0 {
                    Err("delayed strategy requires delay_ms > 0".into())
                } else {
                    Ok(())
                }
            }
            SendStrategyType::Deadline => match self.deadline_ms {
                Some(d) if d > 0 => Ok(()),
                _ => Err("deadline strategy requires deadline_ms > 0".into()),
            },
            SendStrategyType::TimeWindow => match (self.start_ms, self.end_ms) {
                (Some(s), Some(e)) if s > 0 && s <= e => Ok(()),
                _ => Err("time_window strategy requires start_ms <= end_ms, both > 0".into()),
            },
            SendStrategyType::Scheduled => match (self.schedule_at_ms, self.deadline_ms) {
                (Some(s), Some(d)) if s > 0 && d > 0 => Ok(()),
                _ => Err("scheduled strategy requires schedule_at_ms and deadline_ms > 0".into()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub tenant_id: u64,
    pub business_key: String,
    pub receivers: Vec<String>,
    pub channel: Channel,
    pub template: Template,
    pub status: SendStatus,
    pub scheduled_start_ms: i64,
    pub scheduled_end_ms: i64,
    pub version: i32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub strategy_config: Option<SendStrategyConfig>,
}

impl Notification {
    /// Validation applied to every notification submitted through C17,
    /// independent of the strategy-specific window validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant_id == 0 {
            return Err("tenant_id must be > 0".into());
        }
        if self.business_key.is_empty() {
            return Err("business_key must not be empty".into());
        }
        if self.receivers.is_empty() {
            return Err("receivers must not be empty".into());
        }
        self.template.validate()?;
        if let Some(cfg) = &self.strategy_config {
            cfg.validate()?;
        } else {
            return Err("strategy_config is required".into());
        }
        Ok(())
    }

    pub fn hash_key(&self) -> String {
        hash_key(self.tenant_id, &self.business_key)
    }
}

/// The exact string hashed by the sharding strategy and the id generator;
/// both must derive a shard from this same string or shard coherence breaks.
pub fn hash_key(tenant_id: u64, business_key: &str) -> String {
    format!("{tenant_id}:{business_key}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Init,
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackLog {
    pub notification_id: u64,
    pub tenant_id: u64,
    pub business_key: String,
    pub retried_times: i32,
    pub next_retry_at_ms: i64,
    pub status: CallbackStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RetryPolicy {
    FixedInterval { interval_ms: i64, max_times: i32 },
    ExponentialBackoff { init_interval_ms: i64, max_interval_ms: i64, max_times: i32 },
}

impl RetryPolicy {
    /// `next(retried)` returns the delay before the next attempt, or `None`
    /// if the policy is exhausted at this retry count.
    pub fn next(&self, retried: i32) -> Option<i64> {
        match *self {
            RetryPolicy::FixedInterval { interval_ms, max_times } => {
                if retried >= max_times {
                    None
                } else {
                    Some(interval_ms)
                }
            }
            RetryPolicy::ExponentialBackoff { init_interval_ms, max_interval_ms, max_times } => {
                if retried >= max_times {
                    None
                } else {
                    let factor = 1i64.checked_shl(retried as u32).unwrap_or(i64::MAX);
                    let delay = init_interval_ms.saturating_mul(factor);
                    Some(delay.min(max_interval_ms))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelItem {
    pub channel: Channel,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConf {
    pub channels: Vec<ChannelItem>,
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuotaConf {
    pub sms: i64,
    pub email: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyQuotaConf {
    pub sms: i64,
    pub email: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConf {
    pub daily: Option<DailyQuotaConf>,
    pub monthly: Option<MonthlyQuotaConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConf {
    pub service_name: String,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxNotifConf {
    pub service_name: String,
    pub initial_delay_ms: i64,
    pub retry_policy: RetryPolicy,
}

/// Tenant policy. Read-only from the core's perspective; the admin
/// subsystem owns writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BizConf {
    pub id: u64,
    pub owner_id: u64,
    pub owner_type: String,
    pub channel_conf: ChannelConf,
    pub tx_notif_conf: Option<TxNotifConf>,
    pub rate_limit: i32,
    pub quota_conf: QuotaConf,
    pub callback_conf: Option<CallbackConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub notification_id: u64,
    pub status: SendStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResp {
    pub result: SendResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSendResp {
    pub results: Vec<SendResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAsyncSendResp {
    pub notification_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_str() {
        assert_eq!("sms".parse::<Channel>().unwrap(), Channel::Sms);
        assert_eq!("in-app".parse::<Channel>().unwrap(), Channel::InApp);
        assert!("carrier-pigeon".parse::<Channel>().is_err());
    }

    #[test]
    fn time_window_requires_start_before_end() {
        let cfg = SendStrategyConfig {
            kind: SendStrategyType::TimeWindow,
            delay_ms: None,
            schedule_at_ms: None,
            start_ms: Some(200),
            end_ms: Some(100),
            deadline_ms: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn exponential_backoff_caps_at_max_interval() {
        let policy = RetryPolicy::ExponentialBackoff {
            init_interval_ms: 1000,
            max_interval_ms: 5000,
            max_times: 10,
        };
        assert_eq!(policy.next(0), Some(1000));
        assert_eq!(policy.next(1), Some(2000));
        assert_eq!(policy.next(10), None);
        // factor grows past the cap long before max_times in this example
        assert_eq!(policy.next(5), Some(5000));
    }
}
