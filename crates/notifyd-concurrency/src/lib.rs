//! Resource semaphore (C4), adaptive batch sizer (C5), and error-rate
//! bit-ring (C6) — the three small feedback-control primitives the sharded
//! scheduler composes into its per-shard loop.

pub mod adjuster;
pub mod bitring;
pub mod semaphore;

pub use adjuster::{AdjusterConfig, BatchAdjuster};
pub use bitring::BitRing;
pub use semaphore::{AcquireExceedLimit, ResourceSemaphore};
