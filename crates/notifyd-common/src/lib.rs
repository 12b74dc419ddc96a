//! Shared domain types, the unified error taxonomy, and logging setup used
//! across the notification dispatch workspace.

pub mod error;
pub mod logging;
pub mod model;

pub use error::{NotifyError, Result};
pub use model::*;
