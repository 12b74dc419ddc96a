//! Map from physical shard database name to its connection pool. Built
//! once at startup from config and shared by every store implementation.

use notifyd_common::{NotifyError, Result};
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(Clone)]
pub struct ShardedPool {
    pools: HashMap<String, PgPool>,
    db_prefix: String,
    table_prefix: String,
}

impl ShardedPool {
    pub fn new(pools: HashMap<String, PgPool>, db_prefix: impl Into<String>, table_prefix: impl Into<String>) -> Self {
        Self { pools, db_prefix: db_prefix.into(), table_prefix: table_prefix.into() }
    }

    pub fn db_prefix(&self) -> &str {
        &self.db_prefix
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub fn pool_for_db(&self, db_name: &str) -> Result<&PgPool> {
        self.pools.get(db_name).ok_or_else(|| NotifyError::Store(format!("no pool registered for db {db_name}")))
    }

    pub fn all_db_names(&self) -> impl Iterator<Item = &String> {
        self.pools.keys()
    }
}
