//! Provider selection (C11) and channel dispatch (C12): sequential vendor
//! fallback per channel, routed by a notification's channel enum value.

pub mod channel;
pub mod provider;

pub use channel::{ChannelDispatcher, ChannelSender, SequentialChannel};
pub use provider::{send_with_fallback, HttpProvider, Provider, Selector, SelectorBuilder};
