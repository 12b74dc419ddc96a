use notifyd_concurrency::AdjusterConfig;
use std::time::Duration;

/// Tunables for the claim loop and every per-shard loop it spawns.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Resource-semaphore capacity: how many shards this instance will
    /// hold locks for concurrently.
    pub max_locked_shards: u32,
    /// How long a per-shard loop sleeps after an empty batch, net of the
    /// time the batch itself took.
    pub min_schedule_interval: Duration,
    /// Claim-loop backoff when a shard can't be locked, and the lock TTL
    /// each shard lease is minted with.
    pub retry_interval: Duration,
    pub initial_batch_size: u32,
    pub adjuster: AdjusterConfig,
    pub bitring_window_size: usize,
    pub bitring_consecutive_threshold: usize,
    pub bitring_event_rate_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_locked_shards: 8,
            min_schedule_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(5),
            initial_batch_size: 100,
            adjuster: AdjusterConfig::default(),
            bitring_window_size: 128,
            bitring_consecutive_threshold: 3,
            bitring_event_rate_threshold: 0.5,
        }
    }
}
