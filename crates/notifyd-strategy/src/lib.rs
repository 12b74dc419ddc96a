//! Send strategies (C13): computes delivery windows and routes submissions
//! between the synchronous immediate strategy and the async default one.

mod strategy;
mod window;

pub use strategy::{DefaultSendStrategy, ImmediateSendStrategy, SendStrategy, StrategyDispatcher};
pub use window::{apply_window, downgrade_to_async_immediate};
