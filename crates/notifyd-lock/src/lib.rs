//! Lease-based distributed lock over a named key (C3), backed by Redis
//! `SET NX EX` plus Lua scripts for atomic check-and-extend /
//! check-and-delete — the same primitives the teacher's leader-election
//! module uses for a single global lock, generalized here to one lock per
//! storage shard so many instances can each own a disjoint subset of
//! shards concurrently.

use redis::aio::ConnectionManager;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Shared Redis connection used to mint per-shard locks. One `LockClient`
/// per process; each `ShardLock` it creates is independent.
#[derive(Clone)]
pub struct LockClient {
    conn: ConnectionManager,
    holder_id: Arc<String>,
}

impl LockClient {
    pub async fn connect(redis_url: &str, holder_id: impl Into<String>) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, holder_id: Arc::new(holder_id.into()) })
    }

    pub fn connect_with_holder_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Mints a lock handle for `key`; does not attempt to acquire it yet.
    pub fn lock(&self, key: impl Into<String>, ttl_seconds: u64) -> ShardLock {
        ShardLock {
            conn: self.conn.clone(),
            holder_id: self.holder_id.clone(),
            key: key.into(),
            ttl_seconds,
            held: false,
        }
    }
}

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("EXPIRE", KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("DEL", KEYS[1])
    return 1
else
    return 0
end
"#;

/// One lease over one named key. Non-blocking: `try_lock` either succeeds
/// immediately or reports the lock is held elsewhere.
pub struct ShardLock {
    conn: ConnectionManager,
    holder_id: Arc<String>,
    key: String,
    ttl_seconds: u64,
    held: bool,
}

impl ShardLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// `SET key holder NX EX ttl`. Returns `true` if this call acquired the
    /// lock, `false` if another holder already has it.
    pub async fn try_lock(&mut self) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(self.holder_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;

        self.held = result.is_some();
        if self.held {
            debug!(key = %self.key, holder = %self.holder_id, "acquired shard lock");
        }
        Ok(self.held)
    }

    /// Atomic check-and-extend: only extends if this holder still owns the
    /// key. Returns `false` (without error) if the lease was lost —
    /// e.g. expired and re-acquired by another instance.
    pub async fn refresh(&mut self) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let result: i32 = redis::Script::new(EXTEND_SCRIPT)
            .key(&self.key)
            .arg(self.holder_id.as_str())
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await?;

        self.held = result == 1;
        if !self.held {
            warn!(key = %self.key, holder = %self.holder_id, "lost shard lock on refresh");
        }
        Ok(self.held)
    }

    /// Atomic check-and-delete. A no-op if this holder doesn't currently
    /// own the key (e.g. it already expired).
    pub async fn release(&mut self) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let result: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(self.holder_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        self.held = false;
        if result == 1 {
            info!(key = %self.key, holder = %self.holder_id, "released shard lock");
        }
        Ok(())
    }
}

/// Builds the lock key the scheduler uses for one storage shard.
pub fn shard_lock_key(db_suffix: u32, table_suffix: u32) -> String {
    format!("jotify_async_sharding_scheduler:{db_suffix}:{table_suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_lock_key_is_stable_for_same_shard() {
        assert_eq!(shard_lock_key(3, 7), "jotify_async_sharding_scheduler:3:7");
        assert_eq!(shard_lock_key(3, 7), shard_lock_key(3, 7));
        assert_ne!(shard_lock_key(3, 7), shard_lock_key(7, 3));
    }

    #[test]
    fn connect_with_holder_id_generates_distinct_ids() {
        let a = LockClient::connect_with_holder_id();
        let b = LockClient::connect_with_holder_id();
        assert_ne!(a, b);
    }
}
