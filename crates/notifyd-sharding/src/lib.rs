//! Sharding strategy (C1) and shard-aware identifier generator (C2).

pub mod id;
pub mod strategy;

pub use id::{extract_hash, IdGenerator, IdGeneratorError};
pub use strategy::HashStrategy;
