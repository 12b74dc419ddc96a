//! Template approval cache (C9/C11 support): the channel template bundle
//! is owned by an admin subsystem's authoring/approval workflow outside
//! this core, so this crate only ever reads it, through a tiered local ->
//! remote -> authoritative lookup chain, the same shape as `notifyd-bizconf`.

pub mod cache;
pub mod store;

pub use cache::TemplateCache;
pub use store::{InMemoryTemplateStore, PostgresTemplateStore, TemplateStore};
