//! Business-config cache (C8): tenant policy is owned by an admin
//! subsystem outside this core, so this crate only ever reads it, through
//! a tiered local -> remote -> authoritative lookup chain.

pub mod cache;
pub mod store;

pub use cache::BizConfCache;
pub use store::{BizConfStore, InMemoryBizConfStore, PostgresBizConfStore};
