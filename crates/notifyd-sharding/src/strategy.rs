//! Deterministic, stateless hash sharding over `(tenant_id, business_key)`.

use notifyd_common::{hash_key, ShardTarget};
use xxhash_rust::xxh64::xxh64;

const XXHASH_SEED: u64 = 0;

/// `D` and `T` (db and table counts) are fixed at deployment time; changing
/// them re-partitions every existing row, so they are config, not runtime
/// state.
#[derive(Debug, Clone, Copy)]
pub struct HashStrategy {
    pub db_sharding: u64,
    pub table_sharding: u64,
}

impl HashStrategy {
    pub fn new(db_sharding: u64, table_sharding: u64) -> Self {
        assert!(db_sharding > 0 && table_sharding > 0, "sharding counts must be positive");
        Self { db_sharding, table_sharding }
    }

    fn target_from_hash(&self, hash: u64) -> ShardTarget {
        let db_suffix = hash % self.db_sharding;
        let table_suffix = (hash / self.db_sharding) % self.table_sharding;
        ShardTarget { db_suffix, table_suffix }
    }

    /// Shard from the caller's logical key. The write path must either call
    /// this directly or derive the id from the same hash (`shard_with_id`) —
    /// never compute the id independently of the shard.
    pub fn shard(&self, tenant_id: u64, business_key: &str) -> ShardTarget {
        let hash = xxh64(hash_key(tenant_id, business_key).as_bytes(), XXHASH_SEED);
        self.target_from_hash(hash)
    }

    /// Recover the shard from an id that embeds the same hash (see
    /// `notifyd_sharding::id::IdGenerator`).
    pub fn shard_with_id(&self, id: u64) -> ShardTarget {
        let hash = super::id::extract_hash(id);
        self.target_from_hash(hash)
    }

    /// The full cartesian product of shards, used by the scheduler to
    /// enumerate the shards it must try to claim.
    pub fn broadcast(&self) -> Vec<ShardTarget> {
        let mut out = Vec::with_capacity((self.db_sharding * self.table_sharding) as usize);
        for db_suffix in 0..self.db_sharding {
            for table_suffix in 0..self.table_sharding {
                out.push(ShardTarget { db_suffix, table_suffix });
            }
        }
        out
    }

    pub fn hash_of(&self, tenant_id: u64, business_key: &str) -> u64 {
        xxh64(hash_key(tenant_id, business_key).as_bytes(), XXHASH_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_is_deterministic() {
        let strategy = HashStrategy::new(2, 4);
        let a = strategy.shard(42, "k1");
        let b = strategy.shard(42, "k1");
        assert_eq!(a, b);
    }

    #[test]
    fn broadcast_covers_full_cartesian_product() {
        let strategy = HashStrategy::new(2, 4);
        let shards = strategy.broadcast();
        assert_eq!(shards.len(), 8);
        assert!(shards.iter().any(|s| s.db_suffix == 1 && s.table_suffix == 3));
    }

    #[test]
    fn shard_with_id_agrees_with_direct_shard_when_hash_matches() {
        let strategy = HashStrategy::new(2, 4);
        let direct = strategy.shard(42, "k1");
        let hash = strategy.hash_of(42, "k1");
        // id generator embeds only the low 16 bits of the hash; reconstruct
        // an id whose embedded segment matches, and confirm shard coherence.
        let fabricated_id = (hash & 0xFFFF) << 6;
        let from_id = strategy.shard_with_id(fabricated_id);
        assert_eq!(direct, from_id);
    }
}
