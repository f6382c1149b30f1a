//! Shared types for the delivery pipeline.

use serde::Serialize;

/// Folder used when no rule matches.
pub const DEFAULT_FOLDER: &str = "INBOX";

/// Notification title used when the matching rule sets none.
pub const DEFAULT_PUSH_TITLE: &str = "New Email";

/// Notification body used when the message has no Subject.
pub const NO_SUBJECT: &str = "(no subject)";

// ── Routing decision ────────────────────────────────────────────────

/// Where a message goes and what happens alongside delivery.
///
/// Exactly one decision is produced per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Destination mailbox folder.
    pub folder: String,
    /// Tag written as `X-Marked-As`.
    pub mark_as: Option<String>,
    /// Whether to send a push notification.
    pub push_notify: bool,
    pub push_title: String,
    /// Raw Subject, or a placeholder.
    pub push_body: String,
    /// Name of the rule that produced this decision, if any.
    pub matched_rule: Option<String>,
}

impl RoutingDecision {
    /// The no-match decision for a message with the given Subject.
    pub fn default_for(subject: Option<&str>) -> Self {
        Self {
            folder: DEFAULT_FOLDER.to_string(),
            mark_as: None,
            push_notify: false,
            push_title: DEFAULT_PUSH_TITLE.to_string(),
            push_body: subject.unwrap_or(NO_SUBJECT).to_string(),
            matched_rule: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.matched_rule.is_none()
    }
}
