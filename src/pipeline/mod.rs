//! Delivery pipeline for one inbound message.
//!
//! `fetchmail` hands each retrieved message to `mail-bridge deliver <user>`:
//! 1. `MailMessage::parse()`: subject, from, first text/plain body
//! 2. `RulesEngine::evaluate()`: first matching rule decides the folder
//! 3. `WebhookNotifier`: optional push notification
//! 4. `LdaAgent`: hand-off to `dovecot-lda`

pub mod deliver;
pub mod message;
pub mod notify;
pub mod processor;
pub mod rules;
pub mod types;

pub use deliver::{DeliveryAgent, LdaAgent};
pub use message::MailMessage;
pub use notify::{Notifier, PushNotification, WebhookNotifier};
pub use processor::{MessageProcessor, ProcessedMessage};
pub use rules::{RulesEngine, route};
pub use types::RoutingDecision;
