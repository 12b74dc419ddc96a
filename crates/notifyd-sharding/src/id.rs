//! 64-bit identifier generator.
//!
//! Layout (MSB to LSB):
//! - bit 63: reserved, always zero (keeps the id representable in stores
//!   that treat the column as signed 64-bit).
//! - bits 62..22 (41 bits): milliseconds since `EPOCH_MS`, giving
//!   approximate per-process monotonicity and ~69 years of range.
//! - bits 21..6 (16 bits): the low 16 bits of `xxhash64(hash_key(tenant,
//!   business_key))`, so the shard can be recovered from the id alone. See
//!   `notifyd_sharding::strategy` for why 16 bits suffices when `D` and `T`
//!   are powers of two.
//! - bits 5..0 (6 bits): a per-process sequence, reset each millisecond.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

/// 2024-01-01T00:00:00Z in milliseconds, chosen as a fixed epoch so ids stay
/// small enough to leave headroom in the 41-bit timestamp field.
const EPOCH_MS: i64 = 1_704_067_200_000;

const SEQUENCE_BITS: u32 = 6;
const HASH_BITS: u32 = 16;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const HASH_MASK: u64 = (1 << HASH_BITS) - 1;

#[derive(Debug, Error)]
pub enum IdGeneratorError {
    #[error("system clock moved backwards")]
    ClockMovedBackwards,
}

/// Extracts the embedded shard-hash segment from an id produced by
/// `IdGenerator`. `HashStrategy::shard_with_id` feeds this into the same
/// `mod D` / `div D mod T` formula used for a fresh `(tenant, business_key)`.
pub fn extract_hash(id: u64) -> u64 {
    (id >> SEQUENCE_BITS) & HASH_MASK
}

/// Per-process, approximately-monotonic id generator. Collisions are rare
/// but possible (two processes, or two calls within the same millisecond
/// that also collide on the low hash bits and wrap the sequence); callers
/// must retry with a freshly generated id on a duplicate-key failure.
pub struct IdGenerator {
    last_millis: AtomicI64,
    sequence: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { last_millis: AtomicI64::new(0), sequence: AtomicU64::new(0) }
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }

    /// Generates a new id carrying the shard hash of `(tenant_id,
    /// business_key)`. Spin-waits (sub-millisecond) if the per-millisecond
    /// sequence space is exhausted.
    pub fn next(&self, tenant_id: u64, business_key: &str) -> Result<u64, IdGeneratorError> {
        let hash = xxh64(format!("{tenant_id}:{business_key}").as_bytes(), 0) & HASH_MASK;

        loop {
            let now = Self::now_millis();
            let last = self.last_millis.load(Ordering::SeqCst);

            if now < last {
                return Err(IdGeneratorError::ClockMovedBackwards);
            }

            if now == last {
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                if seq & !SEQUENCE_MASK != 0 {
                    // sequence space for this millisecond exhausted, spin to the next tick
                    std::thread::yield_now();
                    continue;
                }
                let timestamp = (now - EPOCH_MS) as u64;
                return Ok(self.assemble(timestamp, hash, seq & SEQUENCE_MASK));
            } else {
                // new millisecond: reset the sequence and proceed
                if self
                    .last_millis
                    .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.sequence.store(0, Ordering::SeqCst);
                    let timestamp = (now - EPOCH_MS) as u64;
                    return Ok(self.assemble(timestamp, hash, 0));
                }
                // lost the race to another thread rolling the millisecond over; retry
            }
        }
    }

    fn assemble(&self, timestamp_ms: u64, hash: u64, sequence: u64) -> u64 {
        (timestamp_ms << (HASH_BITS + SEQUENCE_BITS)) | (hash << SEQUENCE_BITS) | sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_strictly_increasing_within_same_call_site() {
        let gen = IdGenerator::new();
        let mut prev = 0u64;
        for i in 0..1000 {
            let id = gen.next(1, &format!("k{i}")).unwrap();
            assert!(id > prev, "ids must be approximately monotonic");
            prev = id;
        }
    }

    #[test]
    fn extract_hash_matches_embedded_segment() {
        let gen = IdGenerator::new();
        let id = gen.next(42, "biz-key").unwrap();
        let expected = xxh64(b"42:biz-key", 0) & HASH_MASK;
        assert_eq!(extract_hash(id), expected);
    }

    #[test]
    fn sequence_resets_across_millisecond_boundaries() {
        let gen = IdGenerator::new();
        let id1 = gen.next(1, "a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = gen.next(1, "a").unwrap();
        assert!(id2 > id1);
    }
}
