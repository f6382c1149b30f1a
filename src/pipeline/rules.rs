//! Rules engine: decides the destination folder for a message.
//!
//! Rules are checked in stored order and the first rule whose conditions all
//! hold decides the outcome; later rules are never consulted. Within one
//! condition kind any listed term may match, and every kind present on a rule
//! must match. Matching is case-insensitive substring search.

use tracing::{debug, info};

use crate::config::{FilterRule, RuleAction, Terms};
use crate::pipeline::message::MailMessage;
use crate::pipeline::types::RoutingDecision;

/// Which message field a condition matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Subject,
    From,
    Body,
}

/// One condition kind with its lower-cased alternatives.
#[derive(Debug, Clone)]
struct Condition {
    field: RuleField,
    terms: Vec<String>,
}

impl Condition {
    fn new(field: RuleField, terms: &Terms) -> Self {
        Self {
            field,
            terms: terms.as_slice().iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn holds(&self, fields: &NormalizedFields) -> bool {
        let haystack = fields.get(self.field);
        self.terms.iter().any(|term| haystack.contains(term.as_str()))
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    conditions: Vec<Condition>,
    action: RuleAction,
}

impl CompiledRule {
    fn from_rule(rule: &FilterRule) -> Self {
        let c = &rule.conditions;
        let conditions = [
            (RuleField::Subject, &c.subject_contains),
            (RuleField::From, &c.from_contains),
            (RuleField::Body, &c.body_contains),
        ]
        .into_iter()
        .filter_map(|(field, terms)| terms.as_ref().map(|t| Condition::new(field, t)))
        .collect();

        Self {
            name: rule.name.clone(),
            conditions,
            action: rule.action.clone(),
        }
    }

    fn matches(&self, fields: &NormalizedFields) -> bool {
        self.conditions.iter().all(|c| c.holds(fields))
    }

    fn apply(&self, mut decision: RoutingDecision) -> RoutingDecision {
        let action = &self.action;
        if let Some(folder) = &action.folder {
            decision.folder = folder.clone();
        }
        if let Some(mark) = &action.mark_as {
            decision.mark_as = Some(mark.clone());
        }
        if let Some(notify) = action.push_notify {
            decision.push_notify = notify;
        }
        if let Some(title) = &action.push_title {
            decision.push_title = title.clone();
        }
        decision.matched_rule = Some(self.name.clone());
        decision
    }
}

/// Lower-cased views of the matchable fields.
struct NormalizedFields {
    subject: String,
    from: String,
    body: String,
}

impl NormalizedFields {
    fn of(message: &MailMessage) -> Self {
        Self {
            subject: message.subject.as_deref().unwrap_or_default().to_lowercase(),
            from: message.from.as_deref().unwrap_or_default().to_lowercase(),
            body: message.body.to_lowercase(),
        }
    }

    fn get(&self, field: RuleField) -> &str {
        match field {
            RuleField::Subject => &self.subject,
            RuleField::From => &self.from,
            RuleField::Body => &self.body,
        }
    }
}

/// Ordered, first-match-wins rule set.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<CompiledRule>,
}

impl RulesEngine {
    pub fn new(rules: &[FilterRule]) -> Self {
        Self {
            rules: rules.iter().map(CompiledRule::from_rule).collect(),
        }
    }

    /// An engine with no rules; everything goes to the default folder.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Route one message. Never fails; no match yields the default decision.
    pub fn evaluate(&self, message: &MailMessage) -> RoutingDecision {
        let defaults = RoutingDecision::default_for(message.subject.as_deref());
        let fields = NormalizedFields::of(message);

        match self.rules.iter().find(|rule| rule.matches(&fields)) {
            Some(rule) => {
                info!(rule = %rule.name, "Filter rule matched");
                rule.apply(defaults)
            }
            None => {
                debug!("No filter rule matched");
                defaults
            }
        }
    }
}

/// Route `message` through `rules`.
pub fn route(message: &MailMessage, rules: &[FilterRule]) -> RoutingDecision {
    RulesEngine::new(rules).evaluate(message)
}
