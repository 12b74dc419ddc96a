//! Third-party vendor abstraction (C11). A `Provider` sends one
//! notification through one concrete vendor; channels hold several,
//! ordered by priority, and fall back on a failed attempt.

use async_trait::async_trait;
use notifyd_common::{NotifyError, Notification, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Sequential, single-use iterator over a channel's providers in priority
/// order. A fresh selector is built per send so retries from an earlier
/// call never leak cursor state into a new one.
pub struct Selector {
    providers: Vec<Arc<dyn Provider>>,
    cursor: usize,
}

impl Selector {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers, cursor: 0 }
    }

    pub fn next(&mut self) -> Option<Arc<dyn Provider>> {
        let provider = self.providers.get(self.cursor).cloned();
        self.cursor += 1;
        provider
    }
}

#[derive(Default, Clone)]
pub struct SelectorBuilder {
    providers: Vec<Arc<dyn Provider>>,
}

impl SelectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(&self) -> Selector {
        Selector::new(self.providers.clone())
    }
}

/// Tries providers in priority order until one succeeds, returning
/// `FailedToSend` once the selector is exhausted.
pub async fn send_with_fallback(builder: &SelectorBuilder, notification: &Notification) -> Result<()> {
    let mut selector = builder.build();
    let mut last_error: Option<String> = None;

    while let Some(provider) = selector.next() {
        match provider.send(notification).await {
            Ok(()) => {
                debug!(provider = provider.name(), notification_id = notification.id, "provider send succeeded");
                return Ok(());
            }
            Err(err) => {
                warn!(provider = provider.name(), notification_id = notification.id, error = %err, "provider send failed, trying next");
                last_error = Some(err.to_string());
            }
        }
    }

    Err(NotifyError::FailedToSend(last_error.unwrap_or_else(|| "no providers configured".to_string())))
}

/// Reference HTTP provider: POSTs the notification payload to a vendor
/// webhook URL and treats any non-2xx response as a provider failure.
pub struct HttpProvider {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client configuration is static and valid");

        Self { name: name.into(), endpoint: endpoint.into(), client }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self.client.post(&self.endpoint).json(notification).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::FailedToSend(format!("{} responded with {}", self.name, response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyd_common::{Channel, SendStatus, Template};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::HashMap;

    struct FlakyProvider {
        name: String,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _notification: &Notification) -> Result<()> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                Err(NotifyError::FailedToSend("simulated".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_notification() -> Notification {
        Notification {
            id: 1,
            tenant_id: 1,
            business_key: "k".to_string(),
            receivers: vec!["+15550100".to_string()],
            channel: Channel::Sms,
            template: Template { id: 1, version_id: 1, params: HashMap::from([("a".to_string(), "b".to_string())]) },
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
    async fn falls_back_to_next_provider_on_failure() {
        let builder = SelectorBuilder::new()
            .add(Arc::new(FlakyProvider { name: "a".to_string(), fail_times: AtomicUsize::new(1) }))
            .add(Arc::new(FlakyProvider { name: "b".to_string(), fail_times: AtomicUsize::new(0) }));

        let result = send_with_fallback(&builder, &sample_notification()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausting_all_providers_fails() {
        let builder = SelectorBuilder::new().add(Arc::new(FlakyProvider { name: "a".to_string(), fail_times: AtomicUsize::new(5) }));

        let result = send_with_fallback(&builder, &sample_notification()).await;
        assert!(matches!(result, Err(NotifyError::FailedToSend(_))));
    }

    #[tokio::test]
    async fn empty_selector_fails_immediately() {
        let builder = SelectorBuilder::new();
        let result = send_with_fallback(&builder, &sample_notification()).await;
        assert!(result.is_err());
    }
}
