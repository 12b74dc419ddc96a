//! Sharded persistence (C9, C10): one Postgres connection pool per shard
//! database, dynamic table names per shard table, fanned out in parallel
//! across shards for multi-id operations.

pub mod callback_log;
pub mod notification;
pub mod pool;

pub use callback_log::{CallbackLogStore, CallbackLogUpdate, PostgresCallbackLogStore};
pub use notification::{NotificationStore, PostgresNotificationStore};
pub use pool::ShardedPool;
