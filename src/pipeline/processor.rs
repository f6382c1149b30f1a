//! Message processor: routes one inbound message and hands it to delivery.
//!
//! Flow:
//! 1. Rules engine → routing decision (never fails)
//! 2. Annotate headers
//! 3. Push notification, if the decision asks for one (failures only logged)
//! 4. Delivery agent → non-zero exit is surfaced to the caller

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::DeliveryError;
use crate::pipeline::deliver::{DeliveryAgent, annotate};
use crate::pipeline::message::MailMessage;
use crate::pipeline::notify::{Notifier, PushNotification, WebhookNotifier};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::RoutingDecision;

/// Outcome of a successful delivery.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub decision: RoutingDecision,
    /// Whether a push notification was sent successfully.
    pub notified: bool,
    pub processed_at: DateTime<Utc>,
}

pub struct MessageProcessor {
    rules: RulesEngine,
    notifier: Option<Arc<dyn Notifier>>,
    agent: Arc<dyn DeliveryAgent>,
}

impl MessageProcessor {
    pub fn new(
        rules: RulesEngine,
        notifier: Option<Arc<dyn Notifier>>,
        agent: Arc<dyn DeliveryAgent>,
    ) -> Self {
        Self {
            rules,
            notifier,
            agent,
        }
    }

    /// Build from a loaded configuration: its rules and webhook settings.
    pub fn from_config(config: &BridgeConfig, agent: Arc<dyn DeliveryAgent>) -> Self {
        let notifier = WebhookNotifier::from_settings(&config.settings.push_notifications)
            .map(|n| Arc::new(n) as Arc<dyn Notifier>);
        Self::new(RulesEngine::new(&config.filter_rules), notifier, agent)
    }

    /// Route `message` for mailbox `user` and deliver it.
    pub async fn process(
        &self,
        user: &str,
        message: &MailMessage,
    ) -> Result<ProcessedMessage, DeliveryError> {
        let decision = self.rules.evaluate(message);
        info!(user = %user, folder = %decision.folder, "Processing email");

        let processed_at = Utc::now();
        let annotated = annotate(&message.raw, &decision, processed_at);

        let notified = if decision.push_notify {
            self.send_notification(&decision).await
        } else {
            false
        };

        self.agent
            .deliver(user, &decision.folder, &annotated)
            .await?;

        Ok(ProcessedMessage {
            decision,
            notified,
            processed_at,
        })
    }

    async fn send_notification(&self, decision: &RoutingDecision) -> bool {
        let Some(notifier) = &self.notifier else {
            return false;
        };
        let notification = PushNotification::new(&decision.push_title, &decision.push_body);
        match notifier.notify(&notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send push notification: {e}");
                false
            }
        }
    }
}
