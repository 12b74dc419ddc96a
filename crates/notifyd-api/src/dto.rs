//! Request bodies submitted through C17, converted into the domain
//! `Notification` the strategy dispatcher operates on.

use notifyd_common::{Channel, Notification, SendStatus, SendStrategyConfig, Template};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct TemplateDto {
    pub id: u64,
    pub version_id: u64,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub tenant_id: u64,
    pub business_key: String,
    pub receivers: Vec<String>,
    pub channel: String,
    pub template: TemplateDto,
    pub strategy_config: Option<SendStrategyConfig>,
}

impl SendRequest {
    /// Builds a domain notification, substituting `authenticated_tenant_id`
    /// when the request body omits `tenant_id`.
    pub fn into_notification(self, authenticated_tenant_id: u64) -> Result<Notification, String> {
        let channel: Channel = self.channel.parse()?;
        let tenant_id = if self.tenant_id == 0 { authenticated_tenant_id } else { self.tenant_id };

        let notification = Notification {
            id: 0,
            tenant_id,
            business_key: self.business_key,
            receivers: self.receivers,
            channel,
            template: Template { id: self.template.id, version_id: self.template.version_id, params: self.template.params },
            status: SendStatus::Prepare,
            scheduled_start_ms: 0,
            scheduled_end_ms: 0,
            version: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
            strategy_config: Some(self.strategy_config.unwrap_or_else(SendStrategyConfig::immediate)),
        };
        notification.validate()?;
        Ok(notification)
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchSendRequest {
    pub notifications: Vec<SendRequest>,
}

impl BatchSendRequest {
    pub fn into_notifications(self, authenticated_tenant_id: u64) -> Result<Vec<Notification>, String> {
        self.notifications.into_iter().map(|r| r.into_notification(authenticated_tenant_id)).collect()
    }
}
