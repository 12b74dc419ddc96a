//! Notification store (C9): sharded Postgres persistence for the core
//! write-path entity, including the co-located callback-log transition
//! that `mark_success`/`mark_failure` drive.

use crate::pool::ShardedPool;
use async_trait::async_trait;
use futures::future::try_join_all;
use notifyd_common::{
    Channel, CallbackStatus, Notification, NotifyError, Result, SendStatus, ShardTarget, Template,
};
use notifyd_sharding::{HashStrategy, IdGenerator};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const MAX_CREATE_ATTEMPTS: u32 = 5;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Distinguishes a duplicate *id* (regenerate and retry) from a duplicate
/// *(tenant_id, business_key)* (a genuine caller-side resubmission) so the
/// two unique constraints on the notification table don't get confused.
fn is_tenant_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation() && db_err.constraint().map(|c| c.contains("tenant_key")).unwrap_or(false)
    )
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: Notification) -> Result<Notification>;
    async fn create_with_callback(&self, notification: Notification) -> Result<(Notification, notifyd_common::CallbackLog)>;
    /// Like `create`, but a `(tenant_id, business_key)` collision is not an
    /// error: the existing row is fetched and returned instead, with a
    /// `bool` reporting whether this call actually inserted a new row.
    async fn create_or_get_existing(&self, notification: Notification) -> Result<(Notification, bool)>;
    async fn batch_create(&self, notifications: Vec<Notification>) -> Result<Vec<Notification>>;
    async fn batch_create_with_callback(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<(Notification, notifyd_common::CallbackLog)>>;
    async fn batch_update_status(&self, success_ids: &[u64], failure_ids: &[u64]) -> Result<()>;
    async fn get_by_id(&self, id: u64) -> Result<Notification>;
    async fn get_by_key(&self, tenant_id: u64, business_key: &str) -> Result<Option<Notification>>;
    async fn get_map_by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, Notification>>;
    async fn mark_success(&self, notification: &Notification) -> Result<()>;
    async fn mark_failure(&self, notification: &Notification) -> Result<()>;
    async fn compare_and_swap_status(&self, notification: &Notification) -> Result<()>;
    async fn find_ready(&self, shard: ShardTarget, offset: i64, limit: i64) -> Result<Vec<Notification>>;
    /// Creates the notification and callback-log tables for every
    /// `(db, table)` pair implied by the deployment's shard counts.
    async fn init_schema(&self, table_count: u64) -> Result<()>;
}

pub struct PostgresNotificationStore {
    pools: ShardedPool,
    strategy: HashStrategy,
    id_gen: Arc<IdGenerator>,
}

impl PostgresNotificationStore {
    pub fn new(pools: ShardedPool, strategy: HashStrategy, id_gen: Arc<IdGenerator>) -> Self {
        Self { pools, strategy, id_gen }
    }

    fn row_to_notification(row: &sqlx::postgres::PgRow) -> Result<Notification> {
        let channel_str: String = row.try_get("channel")?;
        let status_str: String = row.try_get("status")?;
        let template_json: serde_json::Value = row.try_get("template")?;
        let receivers_json: serde_json::Value = row.try_get("receivers")?;
        let strategy_config_json: Option<serde_json::Value> = row.try_get("strategy_config")?;

        Ok(Notification {
            id: row.try_get::<i64, _>("id")? as u64,
            tenant_id: row.try_get::<i64, _>("tenant_id")? as u64,
            business_key: row.try_get("business_key")?,
            receivers: serde_json::from_value(receivers_json)?,
            channel: channel_str.parse::<Channel>().map_err(NotifyError::Store)?,
            template: serde_json::from_value::<Template>(template_json)?,
            status: parse_status(&status_str)?,
            scheduled_start_ms: row.try_get("scheduled_start_ms")?,
            scheduled_end_ms: row.try_get("scheduled_end_ms")?,
            version: row.try_get("version")?,
            created_at_ms: row.try_get("created_at_ms")?,
            updated_at_ms: row.try_get("updated_at_ms")?,
            strategy_config: strategy_config_json.map(serde_json::from_value).transpose()?,
        })
    }

    async fn insert_one(&self, pool: &PgPool, table: &str, n: &Notification) -> std::result::Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO {table} (id, tenant_id, business_key, receivers, channel, template, status, \
             scheduled_start_ms, scheduled_end_ms, version, created_at_ms, updated_at_ms, strategy_config) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(n.id as i64)
            .bind(n.tenant_id as i64)
            .bind(&n.business_key)
            .bind(serde_json::to_value(&n.receivers).unwrap_or_default())
            .bind(n.channel.as_str())
            .bind(serde_json::to_value(&n.template).unwrap_or_default())
            .bind(status_str(n.status))
            .bind(n.scheduled_start_ms)
            .bind(n.scheduled_end_ms)
            .bind(n.version)
            .bind(n.created_at_ms)
            .bind(n.updated_at_ms)
            .bind(n.strategy_config.as_ref().map(|c| serde_json::to_value(c).unwrap_or_default()))
            .execute(pool)
            .await?;
        Ok(())
    }

    fn shard_of(&self, n: &Notification) -> ShardTarget {
        self.strategy.shard(n.tenant_id, &n.business_key)
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn init_schema(&self, table_count: u64) -> Result<()> {
        for db_name in self.pools.all_db_names().cloned().collect::<Vec<_>>() {
            let pool = self.pools.pool_for_db(&db_name)?;
            for table_suffix in 0..table_count {
                let table = format!("{}_{table_suffix}", self.pools.table_prefix());
                create_notification_table(pool, &table).await?;
                create_callback_log_table(pool, &format!("callback_log_{table_suffix}")).await?;
            }
        }
        Ok(())
    }

    async fn create(&self, mut notification: Notification) -> Result<Notification> {
        let shard = self.shard_of(&notification);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?.clone();

        for attempt in 0..MAX_CREATE_ATTEMPTS {
            let id = self.id_gen.next(notification.tenant_id, &notification.business_key).map_err(|e| NotifyError::Store(e.to_string()))?;
            notification.id = id;

            match self.insert_one(&pool, &table, &notification).await {
                Ok(()) => return Ok(notification),
                Err(err) if is_tenant_key_violation(&err) => return Err(NotifyError::Conflict),
                Err(err) if is_unique_violation(&err) => {
                    warn!(attempt, id, "duplicate notification id, regenerating");
                    continue;
                }
                Err(err) => return Err(NotifyError::Database(err)),
            }
        }
        Err(NotifyError::DuplicateNotificationId(notification.id))
    }

    async fn create_or_get_existing(&self, mut notification: Notification) -> Result<(Notification, bool)> {
        let shard = self.shard_of(&notification);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?.clone();

        for attempt in 0..MAX_CREATE_ATTEMPTS {
            let id = self
                .id_gen
                .next(notification.tenant_id, &notification.business_key)
                .map_err(|e| NotifyError::Store(e.to_string()))?;
            notification.id = id;

            match self.insert_one(&pool, &table, &notification).await {
                Ok(()) => return Ok((notification, true)),
                Err(err) if is_tenant_key_violation(&err) => {
                    let existing = self.get_by_key(notification.tenant_id, &notification.business_key).await?;
                    return match existing {
                        Some(existing) => Ok((existing, false)),
                        None => Err(NotifyError::Store("tenant_key collision but no row found".to_string())),
                    };
                }
                Err(err) if is_unique_violation(&err) => {
                    warn!(attempt, id, "duplicate notification id, regenerating");
                    continue;
                }
                Err(err) => return Err(NotifyError::Database(err)),
            }
        }
        Err(NotifyError::DuplicateNotificationId(notification.id))
    }

    async fn create_with_callback(&self, notification: Notification) -> Result<(Notification, notifyd_common::CallbackLog)> {
        let shard = self.shard_of(&notification);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let callback_table = format!("callback_log_{}", shard.table_suffix);
        let pool = self.pools.pool_for_db(&db_name)?.clone();

        let mut notification = notification;
        for attempt in 0..MAX_CREATE_ATTEMPTS {
            let id = self.id_gen.next(notification.tenant_id, &notification.business_key).map_err(|e| NotifyError::Store(e.to_string()))?;
            notification.id = id;

            let mut tx = pool.begin().await?;
            let insert_result = {
                let query = format!(
                    "INSERT INTO {table} (id, tenant_id, business_key, receivers, channel, template, status, \
                     scheduled_start_ms, scheduled_end_ms, version, created_at_ms, updated_at_ms, strategy_config) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
                );
                sqlx::query(&query)
                    .bind(notification.id as i64)
                    .bind(notification.tenant_id as i64)
                    .bind(&notification.business_key)
                    .bind(serde_json::to_value(&notification.receivers).unwrap_or_default())
                    .bind(notification.channel.as_str())
                    .bind(serde_json::to_value(&notification.template).unwrap_or_default())
                    .bind(status_str(notification.status))
                    .bind(notification.scheduled_start_ms)
                    .bind(notification.scheduled_end_ms)
                    .bind(notification.version)
                    .bind(notification.created_at_ms)
                    .bind(notification.updated_at_ms)
                    .bind(notification.strategy_config.as_ref().map(|c| serde_json::to_value(c).unwrap_or_default()))
                    .execute(&mut *tx)
                    .await
            };

            match insert_result {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await.ok();
                    warn!(attempt, id, "duplicate notification id, regenerating");
                    continue;
                }
                Err(err) => return Err(NotifyError::Database(err)),
            }

            let callback = notifyd_common::CallbackLog {
                notification_id: notification.id,
                tenant_id: notification.tenant_id,
                business_key: notification.business_key.clone(),
                retried_times: 0,
                next_retry_at_ms: notification.created_at_ms,
                status: CallbackStatus::Init,
                created_at_ms: notification.created_at_ms,
                updated_at_ms: notification.updated_at_ms,
            };

            let query = format!(
                "INSERT INTO {callback_table} (notification_id, tenant_id, business_key, retried_times, \
                 next_retry_at_ms, status, created_at_ms, updated_at_ms) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            );
            sqlx::query(&query)
                .bind(callback.notification_id as i64)
                .bind(callback.tenant_id as i64)
                .bind(&callback.business_key)
                .bind(callback.retried_times)
                .bind(callback.next_retry_at_ms)
                .bind(callback_status_str(callback.status))
                .bind(callback.created_at_ms)
                .bind(callback.updated_at_ms)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            return Ok((notification, callback));
        }
        Err(NotifyError::DuplicateNotificationId(notification.id))
    }

    async fn batch_create(&self, notifications: Vec<Notification>) -> Result<Vec<Notification>> {
        let mut by_db: HashMap<String, Vec<Notification>> = HashMap::new();
        for n in notifications {
            let shard = self.shard_of(&n);
            by_db.entry(shard.db_name(self.pools.db_prefix())).or_default().push(n);
        }

        let futures = by_db.into_iter().map(|(db_name, group)| async move {
            let pool = self.pools.pool_for_db(&db_name)?.clone();
            let mut result = Vec::with_capacity(group.len());
            for mut n in group {
                let shard = self.shard_of(&n);
                let table = shard.table_name(self.pools.table_prefix());
                for attempt in 0..MAX_CREATE_ATTEMPTS {
                    let id = self.id_gen.next(n.tenant_id, &n.business_key).map_err(|e| NotifyError::Store(e.to_string()))?;
                    n.id = id;
                    match self.insert_one(&pool, &table, &n).await {
                        Ok(()) => break,
                        Err(err) if is_tenant_key_violation(&err) => return Err(NotifyError::Conflict),
                        Err(err) if is_unique_violation(&err) && attempt + 1 < MAX_CREATE_ATTEMPTS => continue,
                        Err(err) if is_unique_violation(&err) => return Err(NotifyError::DuplicateNotificationId(n.id)),
                        Err(err) => return Err(NotifyError::Database(err)),
                    }
                }
                result.push(n);
            }
            Ok::<_, NotifyError>(result)
        });

        let groups = try_join_all(futures).await?;
        Ok(groups.into_iter().flatten().collect())
    }

    async fn batch_create_with_callback(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<(Notification, notifyd_common::CallbackLog)>> {
        let mut results = Vec::with_capacity(notifications.len());
        for n in notifications {
            results.push(self.create_with_callback(n).await?);
        }
        Ok(results)
    }

    async fn batch_update_status(&self, success_ids: &[u64], failure_ids: &[u64]) -> Result<()> {
        self.update_status_group(success_ids, SendStatus::Success).await?;
        self.update_status_group(failure_ids, SendStatus::Failure).await?;
        Ok(())
    }

    async fn get_by_id(&self, id: u64) -> Result<Notification> {
        let shard = self.strategy.shard_with_id(id);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?;

        let query = format!("SELECT * FROM {table} WHERE id = $1");
        let row = sqlx::query(&query).bind(id as i64).fetch_optional(pool).await?;
        match row {
            Some(row) => Self::row_to_notification(&row),
            None => Err(NotifyError::NotificationNotFound(id)),
        }
    }

    async fn get_by_key(&self, tenant_id: u64, business_key: &str) -> Result<Option<Notification>> {
        let shard = self.strategy.shard(tenant_id, business_key);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?;

        let query = format!("SELECT * FROM {table} WHERE tenant_id = $1 AND business_key = $2");
        let row = sqlx::query(&query).bind(tenant_id as i64).bind(business_key).fetch_optional(pool).await?;
        row.as_ref().map(Self::row_to_notification).transpose()
    }

    async fn get_map_by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, Notification>> {
        let mut by_shard: HashMap<(String, String), Vec<u64>> = HashMap::new();
        for &id in ids {
            let shard = self.strategy.shard_with_id(id);
            let key = (shard.db_name(self.pools.db_prefix()), shard.table_name(self.pools.table_prefix()));
            by_shard.entry(key).or_default().push(id);
        }

        let futures = by_shard.into_iter().map(|((db_name, table), group_ids)| async move {
            let pool = self.pools.pool_for_db(&db_name)?;
            let ids_i64: Vec<i64> = group_ids.iter().map(|&id| id as i64).collect();
            let query = format!("SELECT * FROM {table} WHERE id = ANY($1)");
            let rows = sqlx::query(&query).bind(&ids_i64).fetch_all(pool).await?;
            let mut map = HashMap::with_capacity(rows.len());
            for row in &rows {
                let n = Self::row_to_notification(row)?;
                map.insert(n.id, n);
            }
            Ok::<_, NotifyError>(map)
        });

        let maps = try_join_all(futures).await?;
        let mut merged = HashMap::new();
        for map in maps {
            merged.extend(map);
        }
        Ok(merged)
    }

    async fn mark_success(&self, notification: &Notification) -> Result<()> {
        self.mark_terminal(notification, SendStatus::Success).await
    }

    async fn mark_failure(&self, notification: &Notification) -> Result<()> {
        self.mark_terminal(notification, SendStatus::Failure).await
    }

    async fn compare_and_swap_status(&self, notification: &Notification) -> Result<()> {
        let shard = self.shard_of(notification);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?;

        let query = format!(
            "UPDATE {table} SET status = $1, version = version + 1, updated_at_ms = $2 \
             WHERE id = $3 AND version = $4"
        );
        let result = sqlx::query(&query)
            .bind(status_str(notification.status))
            .bind(notification.updated_at_ms)
            .bind(notification.id as i64)
            .bind(notification.version)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(NotifyError::Conflict);
        }
        Ok(())
    }

    async fn find_ready(&self, shard: ShardTarget, offset: i64, limit: i64) -> Result<Vec<Notification>> {
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let pool = self.pools.pool_for_db(&db_name)?;

        let now = current_millis();
        let query = format!(
            "SELECT * FROM {table} WHERE status = 'pending' AND scheduled_start_ms <= $1 AND scheduled_end_ms >= $1 \
             ORDER BY scheduled_start_ms ASC OFFSET $2 LIMIT $3"
        );
        let rows = sqlx::query(&query).bind(now).bind(offset).bind(limit).fetch_all(pool).await?;
        rows.iter().map(Self::row_to_notification).collect()
    }
}

impl PostgresNotificationStore {
    async fn update_status_group(&self, ids: &[u64], status: SendStatus) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut by_shard: HashMap<(String, String), Vec<i64>> = HashMap::new();
        for &id in ids {
            let shard = self.strategy.shard_with_id(id);
            let key = (shard.db_name(self.pools.db_prefix()), shard.table_name(self.pools.table_prefix()));
            by_shard.entry(key).or_default().push(id as i64);
        }

        let now = current_millis();
        for ((db_name, table), group_ids) in by_shard {
            let pool = self.pools.pool_for_db(&db_name)?;
            let query = format!(
                "UPDATE {table} SET status = $1, version = version + 1, updated_at_ms = $2 WHERE id = ANY($3)"
            );
            sqlx::query(&query).bind(status_str(status)).bind(now).bind(&group_ids).execute(pool).await?;
        }
        Ok(())
    }

    async fn mark_terminal(&self, notification: &Notification, status: SendStatus) -> Result<()> {
        let shard = self.shard_of(notification);
        let db_name = shard.db_name(self.pools.db_prefix());
        let table = shard.table_name(self.pools.table_prefix());
        let callback_table = format!("callback_log_{}", shard.table_suffix);
        let pool = self.pools.pool_for_db(&db_name)?.clone();
        let now = current_millis();

        let mut tx = pool.begin().await?;
        let query = format!("UPDATE {table} SET status = $1, version = version + 1, updated_at_ms = $2 WHERE id = $3");
        sqlx::query(&query)
            .bind(status_str(status))
            .bind(now)
            .bind(notification.id as i64)
            .execute(&mut *tx)
            .await?;

        if status == SendStatus::Success {
            let query = format!(
                "UPDATE {callback_table} SET status = $1, updated_at_ms = $2 WHERE notification_id = $3 AND status = 'init'"
            );
            sqlx::query(&query)
                .bind(callback_status_str(CallbackStatus::Pending))
                .bind(now)
                .bind(notification.id as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn status_str(status: SendStatus) -> &'static str {
    match status {
        SendStatus::Prepare => "prepare",
        SendStatus::Pending => "pending",
        SendStatus::Sending => "sending",
        SendStatus::Success => "success",
        SendStatus::Failure => "failure",
        SendStatus::Canceled => "canceled",
    }
}

fn parse_status(s: &str) -> Result<SendStatus> {
    match s {
        "prepare" => Ok(SendStatus::Prepare),
        "pending" => Ok(SendStatus::Pending),
        "sending" => Ok(SendStatus::Sending),
        "success" => Ok(SendStatus::Success),
        "failure" => Ok(SendStatus::Failure),
        "canceled" => Ok(SendStatus::Canceled),
        other => Err(NotifyError::Store(format!("unknown status in store: {other}"))),
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

fn current_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

pub(crate) async fn create_notification_table(pool: &PgPool, table: &str) -> Result<()> {
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGINT PRIMARY KEY,
            tenant_id BIGINT NOT NULL,
            business_key TEXT NOT NULL,
            receivers JSONB NOT NULL,
            channel TEXT NOT NULL,
            template JSONB NOT NULL,
            status TEXT NOT NULL,
            scheduled_start_ms BIGINT NOT NULL,
            scheduled_end_ms BIGINT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at_ms BIGINT NOT NULL,
            updated_at_ms BIGINT NOT NULL,
            strategy_config JSONB
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_tenant_key ON {table}(tenant_id, business_key);
        CREATE INDEX IF NOT EXISTS idx_{table}_status_window ON {table}(status, scheduled_start_ms, scheduled_end_ms);
        "#
    );
    sqlx::raw_sql(&ddl).execute(pool).await?;
    Ok(())
}

pub(crate) async fn create_callback_log_table(pool: &PgPool, table: &str) -> Result<()> {
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            notification_id BIGINT PRIMARY KEY,
            tenant_id BIGINT NOT NULL,
            business_key TEXT NOT NULL,
            retried_times INTEGER NOT NULL DEFAULT 0,
            next_retry_at_ms BIGINT NOT NULL,
            status TEXT NOT NULL,
            created_at_ms BIGINT NOT NULL,
            updated_at_ms BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_status_retry ON {table}(status, next_retry_at_ms);
        "#
    );
    sqlx::raw_sql(&ddl).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SendStatus::Prepare,
            SendStatus::Pending,
            SendStatus::Sending,
            SendStatus::Success,
            SendStatus::Failure,
            SendStatus::Canceled,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn current_millis_is_plausible() {
        let now = current_millis();
        assert!(now > 1_700_000_000_000);
    }
}
