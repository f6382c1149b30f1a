//! Push notifications via an operator-configured webhook.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PushSettings;
use crate::error::NetworkError;

/// `source` field of every notification.
pub const NOTIFICATION_SOURCE: &str = "mail-bridge";

/// JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub source: String,
    /// RFC 3339.
    pub timestamp: String,
}

impl PushNotification {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            source: NOTIFICATION_SOURCE.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Something that can deliver a push notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &PushNotification) -> Result<(), NetworkError>;
}

/// Posts notifications as JSON to a webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Build from settings. `None` when notifications are disabled or no URL
    /// is configured.
    pub fn from_settings(settings: &PushSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        match settings.webhook_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(Self::new(url, settings.timeout())),
            _ => {
                warn!("Push notifications enabled but no webhook_url configured");
                None
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &PushNotification) -> Result<(), NetworkError> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NetworkError::Webhook(e.without_url().to_string()))?;

        let status = resp.status();
        info!(status = %status, "Push notification sent");
        if status.is_success() {
            Ok(())
        } else {
            Err(NetworkError::Webhook(format!("webhook returned {status}")))
        }
    }
}
