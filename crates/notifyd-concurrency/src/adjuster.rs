//! Adaptive batch sizer (C5): sliding-window comparison of the latest
//! response time against the recent average, with a cooldown between
//! adjustments.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AdjusterConfig {
    pub min_size: u32,
    pub max_size: u32,
    pub step: u32,
    pub ring_size: usize,
    pub min_adjust_interval: Duration,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 1000,
            step: 10,
            ring_size: 32,
            min_adjust_interval: Duration::from_secs(5),
        }
    }
}

/// Grows or shrinks the batch size from recent response latency. Until the
/// response-time ring fills, the current size is returned unchanged —
/// there isn't enough history yet to compare against.
pub struct BatchAdjuster {
    config: AdjusterConfig,
    samples: VecDeque<Duration>,
    current_size: u32,
    last_adjust_at: Option<Instant>,
}

impl BatchAdjuster {
    pub fn new(config: AdjusterConfig, initial_size: u32) -> Self {
        let current_size = initial_size.clamp(config.min_size, config.max_size);
        Self { config, samples: VecDeque::with_capacity(config.ring_size), current_size, last_adjust_at: None }
    }

    pub fn current_size(&self) -> u32 {
        self.current_size
    }

    /// Feeds one response-time sample and returns the (possibly adjusted)
    /// next batch size, always clamped to `[min_size, max_size]`.
    pub fn adjust(&mut self, response_time: Duration) -> u32 {
        if self.samples.len() == self.config.ring_size {
            self.samples.pop_front();
        }
        self.samples.push_back(response_time);

        if self.samples.len() < self.config.ring_size {
            return self.current_size;
        }

        if let Some(last) = self.last_adjust_at {
            if last.elapsed() < self.config.min_adjust_interval {
                return self.current_size;
            }
        }

        let avg_nanos: u128 = self.samples.iter().map(|d| d.as_nanos()).sum::<u128>() / self.samples.len() as u128;
        let latest_nanos = response_time.as_nanos();

        let mut adjusted = false;
        if latest_nanos < avg_nanos && self.current_size < self.config.max_size {
            self.current_size = (self.current_size + self.config.step).min(self.config.max_size);
            adjusted = true;
        } else if latest_nanos > avg_nanos && self.current_size > self.config.min_size {
            self.current_size = self.current_size.saturating_sub(self.config.step).max(self.config.min_size);
            adjusted = true;
        }

        if adjusted {
            self.last_adjust_at = Some(Instant::now());
        }

        self.current_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdjusterConfig {
        AdjusterConfig {
            min_size: 10,
            max_size: 100,
            step: 10,
            ring_size: 4,
            min_adjust_interval: Duration::from_secs(0),
        }
    }

    #[test]
    fn unchanged_until_ring_fills() {
        let mut adjuster = BatchAdjuster::new(config(), 50);
        assert_eq!(adjuster.adjust(Duration::from_millis(100)), 50);
        assert_eq!(adjuster.adjust(Duration::from_millis(100)), 50);
        assert_eq!(adjuster.adjust(Duration::from_millis(100)), 50);
    }

    #[test]
    fn grows_when_latest_sample_beats_average() {
        let mut adjuster = BatchAdjuster::new(config(), 50);
        for _ in 0..3 {
            adjuster.adjust(Duration::from_millis(100));
        }
        // average of [100,100,100,10] after this push is ~77.5ms; latest (10ms) < avg -> grow
        let size = adjuster.adjust(Duration::from_millis(10));
        assert_eq!(size, 60);
    }

    #[test]
    fn shrinks_when_latest_sample_worse_than_average() {
        let mut adjuster = BatchAdjuster::new(config(), 50);
        for _ in 0..3 {
            adjuster.adjust(Duration::from_millis(10));
        }
        let size = adjuster.adjust(Duration::from_millis(1000));
        assert_eq!(size, 40);
    }

    #[test]
    fn clamps_to_bounds() {
        let cfg = AdjusterConfig { min_size: 10, max_size: 55, ..config() };
        let mut adjuster = BatchAdjuster::new(cfg, 50);
        for _ in 0..3 {
            adjuster.adjust(Duration::from_millis(100));
        }
        let size = adjuster.adjust(Duration::from_millis(1));
        assert_eq!(size, 55);
    }
}
