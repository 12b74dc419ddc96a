//! Channel dispatcher (C12): routes a notification to the `Channel`
//! implementation registered for its channel enum value.

use crate::provider::{send_with_fallback, SelectorBuilder};
use async_trait::async_trait;
use notifyd_common::{Channel, NotifyError, Notification, Result};
use std::collections::HashMap;

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// The default channel implementation: sequential provider fallback, per
/// the §4.7 algorithm, built fresh for every send call.
pub struct SequentialChannel {
    selector_builder: SelectorBuilder,
}

impl SequentialChannel {
    pub fn new(selector_builder: SelectorBuilder) -> Self {
        Self { selector_builder }
    }
}

#[async_trait]
impl ChannelSender for SequentialChannel {
    async fn send(&self, notification: &Notification) -> Result<()> {
        send_with_fallback(&self.selector_builder, notification).await
    }
}

#[derive(Default)]
pub struct ChannelDispatcher {
    channels: HashMap<Channel, Box<dyn ChannelSender>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel, sender: Box<dyn ChannelSender>) {
        self.channels.insert(channel, sender);
    }

    pub async fn send(&self, notification: &Notification) -> Result<()> {
        match self.channels.get(&notification.channel) {
            Some(sender) => sender.send(notification).await,
            None => Err(NotifyError::InvalidChannel(notification.channel.as_str().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use notifyd_common::{SendStatus, Template};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    struct AlwaysOk;

    #[async_trait]
    impl Provider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }

        async fn send(&self, _notification: &Notification) -> Result<()> {
            Ok(())
        }
    }

    fn sample_notification(channel: Channel) -> Notification {
        Notification {
            id: 1,
            tenant_id: 1,
            business_key: "k".to_string(),
            receivers: vec!["+15550100".to_string()],
            channel,
            template: Template { id: 1, version_id: 1, params: StdHashMap::from([("a".to_string(), "b".to_string())]) },
            status: SendStatus::Pending,
            scheduled_start_ms: 0,
            scheduled_end_ms: 0,
            version: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
            strategy_config: None,
        }
    }

    #[tokio::test]
    async fn routes_to_the_registered_channel() {
        let mut dispatcher = ChannelDispatcher::new();
        let builder = SelectorBuilder::new().add(Arc::new(AlwaysOk));
        dispatcher.register(Channel::Sms, Box::new(SequentialChannel::new(builder)));

        let result = dispatcher.send(&sample_notification(Channel::Sms)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unregistered_channel_is_invalid() {
        let dispatcher = ChannelDispatcher::new();
        let result = dispatcher.send(&sample_notification(Channel::Email)).await;
        assert!(matches!(result, Err(NotifyError::InvalidChannel(_))));
    }
}
