//! Callback-log store (C10): sharded CRUD plus the pending-retry scan the
//! callback dispatcher (C16) pages through in notification-id order.

use crate::pool::ShardedPool;
use async_trait::async_trait;
use futures::future::try_join_all;
use notifyd_common::{CallbackLog, CallbackStatus, NotifyError, Result, ShardTarget};
use std::collections::HashMap;

/// One mutation applied to a callback log after a delivery attempt.
#[derive(Debug, Clone)]
pub struct CallbackLogUpdate {
    pub notification_id: u64,
    pub status: CallbackStatus,
    pub retried_times: i32,
    pub next_retry_at_ms: i64,
}

#[async_trait]
pub trait CallbackLogStore: Send + Sync {
    /// Pages through pending logs due at or before `start_time_ms`, in
    /// notification-id order starting at `start_id`. Returns the page and
    /// the id to resume from (0 once the page is shorter than `limit`).
    async fn find(&self, shard: ShardTarget, start_time_ms: i64, start_id: u64, limit: i64) -> Result<(Vec<CallbackLog>, u64)>;

    async fn get_map_by_notification_ids(&self, shard: ShardTarget, ids: &[u64]) -> Result<HashMap<u64, CallbackLog>>;

    async fn batch_update(&self, shard: ShardTarget, updates: &[CallbackLogUpdate]) -> Result<()>;
}

pub struct PostgresCallbackLogStore {
    pools: ShardedPool,
}

impl PostgresCallbackLogStore {
    pub fn new(pools: ShardedPool) -> Self {
        Self { pools }
    }

    fn table_name(&self, shard: ShardTarget) -> String {
        format!("callback_log_{}", shard.table_suffix)
    }

    fn row_to_log(row: &sqlx::postgres::PgRow) -> Result<CallbackLog> {
        use sqlx::Row;
        let status_str: String = row.try_get("status")?;
        Ok(CallbackLog {
            notification_id: row.try_get::<i64, _>("notification_id")? as u64,
            tenant_id: row.try_get::<i64, _>("tenant_id")? as u64,
            business_key: row.try_get("business_key")?,
            retried_times: row.try_get("retried_times")?,
            next_retry_at_ms: row.try_get("next_retry_at_ms")?,
            status: parse_callback_status(&status_str)?,
            created_at_ms: row.try_get("created_at_ms")?,
            updated_at_ms: row.try_get("updated_at_ms")?,
        })
    }
}

#[async_trait]
impl CallbackLogStore for PostgresCallbackLogStore {
    async fn find(&self, shard: ShardTarget, start_time_ms: i64, start_id: u64, limit: i64) -> Result<(Vec<CallbackLog>, u64)> {
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = self.table_name(shard);
        let pool = self.pools.pool_for_db(&db_name)?;

        let query = format!(
            "SELECT * FROM {table} WHERE status = 'pending' AND next_retry_at_ms <= $1 AND notification_id >= $2 \
             ORDER BY notification_id ASC LIMIT $3"
        );
        let rows = sqlx::query(&query).bind(start_time_ms).bind(start_id as i64).bind(limit).fetch_all(pool).await?;

        let logs = rows.iter().map(Self::row_to_log).collect::<Result<Vec<_>>>()?;
        let next_start_id = if logs.len() as i64 == limit {
            logs.last().map(|l| l.notification_id + 1).unwrap_or(0)
        } else {
            0
        };
        Ok((logs, next_start_id))
    }

    async fn get_map_by_notification_ids(&self, shard: ShardTarget, ids: &[u64]) -> Result<HashMap<u64, CallbackLog>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = self.table_name(shard);
        let pool = self.pools.pool_for_db(&db_name)?;

        let ids_i64: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
        let query = format!("SELECT * FROM {table} WHERE notification_id = ANY($1)");
        let rows = sqlx::query(&query).bind(&ids_i64).fetch_all(pool).await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let log = Self::row_to_log(row)?;
            map.insert(log.notification_id, log);
        }
        Ok(map)
    }

    async fn batch_update(&self, shard: ShardTarget, updates: &[CallbackLogUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = self.table_name(shard);
        let pool = self.pools.pool_for_db(&db_name)?.clone();

        let futures = updates.iter().map(|update| {
            let table = table.clone();
            let pool = pool.clone();
            async move {
                let query = format!(
                    "UPDATE {table} SET status = $1, retried_times = $2, next_retry_at_ms = $3, updated_at_ms = $4 \
                     WHERE notification_id = $5"
                );
                sqlx::query(&query)
                    .bind(callback_status_str(update.status))
                    .bind(update.retried_times)
                    .bind(update.next_retry_at_ms)
                    .bind(current_millis())
                    .bind(update.notification_id as i64)
                    .execute(&pool)
                    .await?;
                Ok::<_, NotifyError>(())
            }
        });

        try_join_all(futures).await?;
        Ok(())
    }
}

fn callback_status_str(status: CallbackStatus) -> &'static str {
    match status {
        CallbackStatus::Init => "init",
        CallbackStatus::Pending => "pending",
        CallbackStatus::Success => "success",
        CallbackStatus::Failure => "failure",
    }
}

fn parse_callback_status(s: &str) -> Result<CallbackStatus> {
    match s {
        "init" => Ok(CallbackStatus::Init),
        "pending" => Ok(CallbackStatus::Pending),
        "success" => Ok(CallbackStatus::Success),
        "failure" => Ok(CallbackStatus::Failure),
        other => Err(NotifyError::Store(format!("unknown callback status in store: {other}"))),
    }
}

fn current_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_status_round_trips_through_str() {
        for status in [CallbackStatus::Init, CallbackStatus::Pending, CallbackStatus::Success, CallbackStatus::Failure] {
            assert_eq!(parse_callback_status(callback_status_str(status)).unwrap(), status);
        }
    }
}
