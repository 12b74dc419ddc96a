//! Sharded scheduler (C15): a single claim-loop task cooperatively spreads
//! storage shards across instances via per-shard Redis locks, then drives
//! one dedicated task per shard it holds — each running a find-ready +
//! batch-send cycle with adaptive batching and failure-burst detection.

use crate::config::SchedulerConfig;
use dashmap::DashSet;
use notifyd_common::{Result, ShardTarget};
use notifyd_concurrency::{AcquireExceedLimit, BatchAdjuster, BitRing, ResourceSemaphore};
use notifyd_lock::{shard_lock_key, LockClient, ShardLock};
use notifyd_sender::Sender;
use notifyd_sharding::HashStrategy;
use notifyd_store::NotificationStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct Scheduler {
    strategy: HashStrategy,
    lock_client: LockClient,
    semaphore: ResourceSemaphore,
    notif_store: Arc<dyn NotificationStore>,
    sender: Arc<Sender>,
    config: SchedulerConfig,
    active_shards: DashSet<(u64, u64)>,
}

impl Scheduler {
    pub fn new(
        strategy: HashStrategy,
        lock_client: LockClient,
        notif_store: Arc<dyn NotificationStore>,
        sender: Arc<Sender>,
        config: SchedulerConfig,
    ) -> Self {
        let semaphore = ResourceSemaphore::new(config.max_locked_shards);
        Self { strategy, lock_client, semaphore, notif_store, sender, config, active_shards: DashSet::new() }
    }

    /// Re-reads on every claim-loop pass, so an operator's config watcher
    /// can shrink or grow how many shards this instance holds at once.
    pub fn set_max_locked_shards(&self, max_locked_shards: u32) {
        self.semaphore.set_max_cnt(max_locked_shards);
    }

    /// Runs the claim loop forever. Intended to be spawned as its own
    /// top-level task; never returns under normal operation.
    pub async fn run(self: Arc<Self>) {
        loop {
            for shard in self.strategy.broadcast() {
                self.clone().try_claim_shard(shard).await;
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    async fn try_claim_shard(self: Arc<Self>, shard: ShardTarget) {
        let shard_key = (shard.db_suffix, shard.table_suffix);
        if self.active_shards.contains(&shard_key) {
            return;
        }

        if let Err(AcquireExceedLimit) = self.semaphore.acquire() {
            return;
        }

        let key = shard_lock_key(shard.db_suffix as u32, shard.table_suffix as u32);
        let mut lock = self.lock_client.lock(key, self.config.retry_interval.as_secs().max(1));
        match lock.try_lock().await {
            Ok(true) => {
                self.active_shards.insert(shard_key);
                info!(db_suffix = shard.db_suffix, table_suffix = shard.table_suffix, "claimed shard");
                metrics::counter!("scheduler.shards.claimed_total").increment(1);
                metrics::gauge!("scheduler.shards.active").set(self.active_shards.len() as f64);
                tokio::spawn(async move {
                    self.run_shard_loop(shard, lock).await;
                });
            }
            Ok(false) => {
                self.semaphore.release();
            }
            Err(err) => {
                warn!(error = %err, db_suffix = shard.db_suffix, table_suffix = shard.table_suffix, "shard lock attempt failed");
                self.semaphore.release();
            }
        }
    }

    async fn run_shard_loop(self: Arc<Self>, shard: ShardTarget, mut lock: ShardLock) {
        let mut adjuster = BatchAdjuster::new(self.config.adjuster.clone(), self.config.initial_batch_size);
        let mut bitring =
            BitRing::new(self.config.bitring_window_size, self.config.bitring_consecutive_threshold, self.config.bitring_event_rate_threshold);

        loop {
            let start = Instant::now();
            let batch_size = adjuster.current_size();
            let outcome = self.process_batch(shard, batch_size).await;
            let response_time = start.elapsed();

            bitring.add(outcome.is_err());
            if outcome.is_err() {
                metrics::counter!("scheduler.batches.failed_total").increment(1);
            }
            if bitring.threshold_triggered() {
                warn!(db_suffix = shard.db_suffix, table_suffix = shard.table_suffix, "error-rate threshold tripped, exiting shard loop");
                break;
            }

            let count = outcome.unwrap_or(0);
            adjuster.adjust(response_time);
            metrics::gauge!("scheduler.batch_size", "db_suffix" => shard.db_suffix.to_string(), "table_suffix" => shard.table_suffix.to_string())
                .set(adjuster.current_size() as f64);
            if count > 0 {
                metrics::counter!("scheduler.notifications.dispatched_total").increment(count as u64);
            }

            if count == 0 {
                let sleep_for = self.config.min_schedule_interval.saturating_sub(response_time);
                if !sleep_for.is_zero() {
                    tokio::time::sleep(sleep_for).await;
                }
            }

            match lock.refresh().await {
                Ok(true) => {}
                _ => {
                    warn!(db_suffix = shard.db_suffix, table_suffix = shard.table_suffix, "lost shard lock, exiting shard loop");
                    break;
                }
            }
        }

        let _ = tokio::time::timeout(self.config.retry_interval, lock.release()).await;
        self.active_shards.remove(&(shard.db_suffix, shard.table_suffix));
        self.semaphore.release();
        metrics::gauge!("scheduler.shards.active").set(self.active_shards.len() as f64);
    }

    async fn process_batch(&self, shard: ShardTarget, batch_size: u32) -> Result<usize> {
        let rows = self.notif_store.find_ready(shard, 0, batch_size as i64).await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        self.sender.batch_send(rows).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_clamps_batch_size_within_adjuster_bounds() {
        let config = SchedulerConfig::default();
        assert!(config.initial_batch_size >= config.adjuster.min_size);
        assert!(config.initial_batch_size <= config.adjuster.max_size);
    }
}
