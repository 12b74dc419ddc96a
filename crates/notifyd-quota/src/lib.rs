//! Tenant x channel quota counters (C7): atomic reserve/refund on Redis
//! keys `quota:{tenant_id}:{channel}`, backed by Lua scripts so a
//! check-then-decrement is a single round trip with no observable
//! negative intermediate state — the same `EVAL`-script approach the
//! teacher's distributed lock uses for its own check-and-extend.

use notifyd_common::{Channel, NotifyError, Result};
use redis::aio::ConnectionManager;
use tracing::debug;

fn quota_key(tenant_id: u64, channel: Channel) -> String {
    format!("quota:{tenant_id}:{}", channel.as_str())
}

/// Single counter decremented only if the result would stay non-negative.
/// Missing keys are treated as zero remaining quota (provisioning a
/// tenant's counters is the business-config layer's job, not this one's).
const DECR_SCRIPT: &str = r#"
local current = tonumber(redis.call("GET", KEYS[1]) or "0")
local n = tonumber(ARGV[1])
if current < n then
    return -1
end
redis.call("DECRBY", KEYS[1], n)
return 1
"#;

/// All-or-none multi-key decrement: checks every key first, only applies
/// `DECRBY` once every key has sufficient balance. Returns the 1-based
/// index (as a Lua-returned integer) of the first insufficient key, or 0
/// on success.
const BATCH_DECR_SCRIPT: &str = r#"
local n = #KEYS
for i = 1, n do
    local current = tonumber(redis.call("GET", KEYS[i]) or "0")
    local want = tonumber(ARGV[i])
    if current < want then
        return i
    end
end
for i = 1, n do
    redis.call("DECRBY", KEYS[i], tonumber(ARGV[i]))
end
return 0
"#;

#[derive(Clone)]
pub struct QuotaCache {
    conn: ConnectionManager,
}

/// One `(tenant_id, channel, amount)` line item in a batch reserve or
/// refund.
#[derive(Debug, Clone, Copy)]
pub struct QuotaItem {
    pub tenant_id: u64,
    pub channel: Channel,
    pub amount: i64,
}

impl QuotaItem {
    pub fn new(tenant_id: u64, channel: Channel, amount: i64) -> Self {
        Self { tenant_id, channel, amount }
    }
}

impl QuotaCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Reserves `n` units of quota for one tenant/channel pair.
    pub async fn decr(&self, tenant_id: u64, channel: Channel, n: i64) -> Result<()> {
        let key = quota_key(tenant_id, channel);
        let mut conn = self.conn.clone();
        let result: i64 = redis::Script::new(DECR_SCRIPT).key(&key).arg(n).invoke_async(&mut conn).await?;

        if result < 0 {
            return Err(NotifyError::InsufficientQuota { tenant_id, channel: channel.as_str().to_string() });
        }
        debug!(tenant_id, channel = channel.as_str(), n, "reserved quota");
        Ok(())
    }

    /// Unconditional refund, e.g. after a downstream send failure.
    pub async fn incr(&self, tenant_id: u64, channel: Channel, n: i64) -> Result<()> {
        let key = quota_key(tenant_id, channel);
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("INCRBY").arg(&key).arg(n).query_async(&mut conn).await?;
        debug!(tenant_id, channel = channel.as_str(), n, "refunded quota");
        Ok(())
    }

    /// All-or-none reservation across several tenant/channel pairs.
    pub async fn batch_decr(&self, items: &[QuotaItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = items.iter().map(|i| quota_key(i.tenant_id, i.channel)).collect();
        let mut script = redis::Script::new(BATCH_DECR_SCRIPT).prepare_invoke();
        for key in &keys {
            script.key(key);
        }
        for item in items {
            script.arg(item.amount);
        }
        let mut conn = self.conn.clone();
        let failed_index: i64 = script.invoke_async(&mut conn).await?;

        if failed_index > 0 {
            let item = items[(failed_index - 1) as usize];
            return Err(NotifyError::InsufficientQuota { tenant_id: item.tenant_id, channel: item.channel.as_str().to_string() });
        }
        Ok(())
    }

    /// All-or-none refund across several tenant/channel pairs. Unlike
    /// `batch_decr` there's no failure mode to report: an unconditional
    /// `INCRBY` per key always succeeds, so this simply pipelines them.
    pub async fn batch_incr(&self, items: &[QuotaItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for item in items {
            pipe.cmd("INCRBY").arg(quota_key(item.tenant_id, item.channel)).arg(item.amount).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_key_matches_expected_format() {
        assert_eq!(quota_key(42, Channel::Sms), "quota:42:sms");
        assert_eq!(quota_key(7, Channel::InApp), "quota:7:in-app");
    }

    #[test]
    fn quota_item_carries_fields_through() {
        let item = QuotaItem::new(9, Channel::Email, 3);
        assert_eq!(item.tenant_id, 9);
        assert_eq!(item.amount, 3);
    }
}
