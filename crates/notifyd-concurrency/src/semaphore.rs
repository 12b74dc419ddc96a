//! Non-blocking resource semaphore (C4): caps concurrent shard claims per
//! instance. `acquire` fails fast rather than blocking, so a caller that
//! hits the cap can move on to try claiming a different shard.

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("acquire exceeded the resource limit")]
pub struct AcquireExceedLimit;

struct Inner {
    max_cnt: u32,
    curr_cnt: u32,
}

/// Integer-count semaphore with a runtime-adjustable capacity. Readers of
/// the capacity re-read it on every `acquire`, so a config-watch task can
/// call `set_max_cnt` concurrently with callers acquiring/releasing.
pub struct ResourceSemaphore {
    inner: Mutex<Inner>,
}

impl ResourceSemaphore {
    pub fn new(max_cnt: u32) -> Self {
        Self { inner: Mutex::new(Inner { max_cnt, curr_cnt: 0 }) }
    }

    /// Non-blocking acquire. Returns `AcquireExceedLimit` instead of
    /// waiting when the semaphore is already at capacity.
    pub fn acquire(&self) -> Result<(), AcquireExceedLimit> {
        let mut inner = self.inner.lock();
        if inner.curr_cnt >= inner.max_cnt {
            return Err(AcquireExceedLimit);
        }
        inner.curr_cnt += 1;
        Ok(())
    }

    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.curr_cnt = inner.curr_cnt.saturating_sub(1);
    }

    /// Hot-reload the capacity; a single writer (the config watcher) is
    /// expected to call this, serialized by the same mutex readers use.
    pub fn set_max_cnt(&self, max_cnt: u32) {
        self.inner.lock().max_cnt = max_cnt;
    }

    pub fn current_count(&self) -> u32 {
        self.inner.lock().curr_cnt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_fails_fast_at_capacity() {
        let sem = ResourceSemaphore::new(1);
        assert!(sem.acquire().is_ok());
        assert_eq!(sem.acquire(), Err(AcquireExceedLimit));
        sem.release();
        assert!(sem.acquire().is_ok());
    }

    #[test]
    fn set_max_cnt_hot_reloads_capacity() {
        let sem = ResourceSemaphore::new(1);
        assert!(sem.acquire().is_ok());
        sem.set_max_cnt(2);
        assert!(sem.acquire().is_ok());
        assert_eq!(sem.acquire(), Err(AcquireExceedLimit));
    }
}
