//! Computes a notification's delivery window from its strategy config,
//! per the fixed table of `(type -> scheduled_start, scheduled_end)`
//! rules. Every variant reads `now` once so the whole window is computed
//! against a single instant.

use notifyd_common::{NotifyError, Notification, Result, SendStrategyConfig, SendStrategyType};

const IMMEDIATE_WINDOW_MS: i64 = 30 * 60 * 1000;
const ASYNC_IMMEDIATE_DEADLINE_MS: i64 = 60 * 1000;
const SCHEDULED_LEAD_MS: i64 = 3 * 1000;

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

/// Computes and stamps `(scheduled_start_ms, scheduled_end_ms)` on the
/// notification in place, per its `strategy_config`.
pub fn apply_window(notification: &mut Notification) -> Result<()> {
    let cfg = notification
        .strategy_config
        .as_ref()
        .ok_or_else(|| NotifyError::Store("strategy_config is required to compute a window".to_string()))?;
    cfg.validate().map_err(NotifyError::Store)?;

    let now = now_millis();
    let (start, end) = window_for(cfg, now)?;
    notification.scheduled_start_ms = start;
    notification.scheduled_end_ms = end;
    Ok(())
}

fn window_for(cfg: &SendStrategyConfig, now: i64) -> Result<(i64, i64)> {
    match cfg.kind {
        SendStrategyType::Immediate => Ok((now, now + IMMEDIATE_WINDOW_MS)),
        SendStrategyType::Delayed => {
            let delay = cfg.delay_ms.ok_or_else(|| NotifyError::Store("delayed strategy missing delay_ms".to_string()))?;
            Ok((now, now + delay))
        }
        SendStrategyType::Deadline => {
            let deadline = cfg.deadline_ms.ok_or_else(|| NotifyError::Store("deadline strategy missing deadline_ms".to_string()))?;
            Ok((now, deadline))
        }
        SendStrategyType::TimeWindow => {
            let start = cfg.start_ms.ok_or_else(|| NotifyError::Store("time_window strategy missing start_ms".to_string()))?;
            let end = cfg.end_ms.ok_or_else(|| NotifyError::Store("time_window strategy missing end_ms".to_string()))?;
            Ok((start, end))
        }
        SendStrategyType::Scheduled => {
            let schedule_at = cfg
                .schedule_at_ms
                .ok_or_else(|| NotifyError::Store("scheduled strategy missing schedule_at_ms".to_string()))?;
            let deadline = cfg.deadline_ms.ok_or_else(|| NotifyError::Store("scheduled strategy missing deadline_ms".to_string()))?;
            Ok((schedule_at - SCHEDULED_LEAD_MS, deadline))
        }
    }
}

/// Rewrites an immediate request downgraded to async under load: the
/// strategy becomes `deadline` with a fixed one-minute ceiling, kept fixed
/// rather than tenant-configurable (see the design ledger's resolution of
/// this open question).
pub fn downgrade_to_async_immediate(notification: &mut Notification) {
    let now = now_millis();
    notification.strategy_config =
        Some(SendStrategyConfig { kind: SendStrategyType::Deadline, delay_ms: None, schedule_at_ms: None, start_ms: None, end_ms: None, deadline_ms: Some(now + ASYNC_IMMEDIATE_DEADLINE_MS) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_window_is_thirty_minutes() {
        let (start, end) = window_for(&SendStrategyConfig::immediate(), 1_000).unwrap();
        assert_eq!(start, 1_000);
        assert_eq!(end, 1_000 + IMMEDIATE_WINDOW_MS);
    }

    #[test]
    fn scheduled_window_subtracts_lead_time() {
        let cfg = SendStrategyConfig {
            kind: SendStrategyType::Scheduled,
            delay_ms: None,
            schedule_at_ms: Some(100_000),
            start_ms: None,
            end_ms: None,
            deadline_ms: Some(200_000),
        };
        let (start, end) = window_for(&cfg, 0).unwrap();
        assert_eq!(start, 100_000 - SCHEDULED_LEAD_MS);
        assert_eq!(end, 200_000);
    }

    #[test]
    fn time_window_passes_config_through_unchanged() {
        let cfg = SendStrategyConfig {
            kind: SendStrategyType::TimeWindow,
            delay_ms: None,
            schedule_at_ms: None,
            start_ms: Some(10),
            end_ms: Some(20),
            deadline_ms: None,
        };
        let (start, end) = window_for(&cfg, 999).unwrap();
        assert_eq!((start, end), (10, 20));
    }

    #[test]
    fn downgrade_rewrites_to_fixed_deadline() {
        use notifyd_common::{Channel, SendStatus, Template};
        use std::collections::HashMap;

        let mut n = Notification {
            id: 1,
            tenant_id: 1,
            business_key: "k".to_string(),
            receivers: vec!["+15550100".to_string()],
            channel: Channel::Sms,
            template: Template { id: 1, version_id: 1, params: HashMap::from([("a".to_string(), "b".to_string())]) },
            status: SendStatus::Pending,
            scheduled_start_ms: 0,
            scheduled_end_ms: 0,
            version: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
            strategy_config: Some(SendStrategyConfig::immediate()),
        };
        downgrade_to_async_immediate(&mut n);
        let cfg = n.strategy_config.unwrap();
        assert_eq!(cfg.kind, SendStrategyType::Deadline);
        assert!(cfg.deadline_ms.unwrap() > now_millis());
    }
}
