//! Pre-classification rules engine for fast pattern matching.
//!
//! Runs before the generator is asked to classify, to short-circuit obvious
//! machine mail:
//! - noreply / mailer-daemon / postmaster senders
//! - Bounce and delivery-failure subjects
//! - Out-of-office auto-replies
//! - Unsubscribe footers and transactional notices
//! - The mailbox's own address (never reply to ourselves)
//!
//! A match means `Automated` and the generator call is skipped.

use regex::Regex;
use tracing::{debug, warn};

use crate::channels::Message;
use crate::channels::email_types::strip_quoted_text;

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
}

/// A single automated-mail rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct AutomatedRule {
    /// Human-readable pattern description.
    pub pattern: String,
    pub regex: Regex,
    pub field: RuleField,
    /// Why this rule triggers.
    pub reason: String,
}

/// Result of a rule match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub pattern: String,
    pub reason: String,
}

/// Pre-classification rules engine.
pub struct RulesEngine {
    rules: Vec<AutomatedRule>,
    /// Senders that always go to the generator (bypass every rule).
    exempt_senders: Vec<Regex>,
}

/// (description, regex, field, reason)
const DEFAULT_RULES: &[(&str, &str, RuleField, &str)] = &[
    (
        "noreply@*",
        r"(?i)(^|[<\s])no[\-_.]?reply@",
        RuleField::Sender,
        "noreply sender",
    ),
    (
        "mailer-daemon / postmaster",
        r"(?i)(^|[<\s])(mailer[\-_]?daemon|postmaster|mailer)@",
        RuleField::Sender,
        "automated mail system",
    ),
    (
        "bulk sender domain",
        r"(?i)@(marketing|newsletter|promo|campaign|bounce[s]?)\.",
        RuleField::Sender,
        "marketing/newsletter sender",
    ),
    (
        "delivery failure subject",
        r"(?i)(undeliver(able|ed)|delivery (status notification|failure|has failed)|mail delivery (failed|subsystem)|returned mail|failure notice)",
        RuleField::Subject,
        "bounce / delivery failure",
    ),
    (
        "auto-reply subject",
        r"(?i)^\s*(automatic reply|auto[\- ]?reply|out of (the )?office|autoreply)\b",
        RuleField::Subject,
        "auto-reply",
    ),
    (
        "unsubscribe in subject",
        r"(?i)\bunsubscribe\b",
        RuleField::Subject,
        "newsletter/marketing (unsubscribe in subject)",
    ),
    (
        "unsubscribe footer",
        r"(?i)(click here to unsubscribe|manage your subscription|email preferences|opt[- ]?out of these)",
        RuleField::Body,
        "bulk/marketing email (unsubscribe footer)",
    ),
    (
        "transactional notice",
        r"(?i)(tracking (number|update)|has been delivered|out for delivery|payment (received|confirmed)|receipt for your)",
        RuleField::Body,
        "transactional notification",
    ),
];

impl RulesEngine {
    /// Create a rules engine with the default automated-mail patterns.
    pub fn default_rules() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, re, field, reason)| match Regex::new(re) {
                Ok(regex) => Some(AutomatedRule {
                    pattern: (*pattern).to_string(),
                    regex,
                    field: *field,
                    reason: (*reason).to_string(),
                }),
                Err(e) => {
                    warn!(pattern, error = %e, "Skipping invalid built-in rule");
                    None
                }
            })
            .collect();

        Self {
            rules,
            exempt_senders: Vec::new(),
        }
    }

    /// Create an empty rules engine (for testing).
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            exempt_senders: Vec::new(),
        }
    }

    /// Treat mail from our own address as automated so we never reply to ourselves.
    pub fn with_self_address(mut self, address: &str) -> Self {
        let address = address.trim();
        if address.is_empty() {
            return self;
        }
        let pattern = format!(r"(?i)(^|<){}(>|$)", regex::escape(address));
        match Regex::new(&pattern) {
            Ok(regex) => self.rules.push(AutomatedRule {
                pattern: address.to_string(),
                regex,
                field: RuleField::Sender,
                reason: "sent from this mailbox".into(),
            }),
            Err(e) => warn!(address, error = %e, "Could not build self-address rule"),
        }
        self
    }

    /// Add a sender/domain pattern that always goes to the generator.
    pub fn add_exempt_sender(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.exempt_senders.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Add a custom automated rule.
    pub fn add_rule(
        &mut self,
        pattern: &str,
        field: RuleField,
        reason: &str,
    ) -> Result<(), regex::Error> {
        self.rules.push(AutomatedRule {
            pattern: pattern.into(),
            regex: Regex::new(pattern)?,
            field,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate a message against all rules.
    ///
    /// Returns `Some(RuleMatch)` on the first matching rule, `None` to fall
    /// through to generator classification. Body rules only see the new text;
    /// quoted history is ignored.
    pub fn evaluate(&self, message: &Message) -> Option<RuleMatch> {
        if self
            .exempt_senders
            .iter()
            .any(|r| r.is_match(&message.sender))
        {
            debug!(
                sender = %message.sender,
                "Sender is exempt from rules, deferring to classifier"
            );
            return None;
        }

        let body = strip_quoted_text(&message.body);
        for rule in &self.rules {
            let field_value = match rule.field {
                RuleField::Sender => message.sender.as_str(),
                RuleField::Subject => message.subject.as_str(),
                RuleField::Body => body.as_str(),
            };

            if rule.regex.is_match(field_value) {
                debug!(
                    id = %message.id,
                    sender = %message.sender,
                    rule = %rule.pattern,
                    reason = %rule.reason,
                    "Message matched automated rule"
                );
                return Some(RuleMatch {
                    pattern: rule.pattern.clone(),
                    reason: rule.reason.clone(),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_message(sender: &str, subject: &str, body: &str) -> Message {
        Message {
            id: "test-1".into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn all_default_rules_compile() {
        assert_eq!(RulesEngine::default_rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn matches_noreply() {
        let engine = RulesEngine::default_rules();
        for sender in ["noreply@company.com", "no-reply@service.io", "No_Reply@x.org"] {
            let msg = make_message(sender, "Your account", "Welcome!");
            assert!(engine.evaluate(&msg).is_some(), "{sender} should match");
        }
    }

    #[test]
    fn matches_mailer_daemon() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "MAILER-DAEMON@mx.corp.com",
            "Undelivered Mail Returned to Sender",
            "This is an automated delivery failure notice.",
        );
        let m = engine.evaluate(&msg).unwrap();
        assert_eq!(m.reason, "automated mail system");
    }

    #[test]
    fn matches_bounce_subject() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "alerts@mx.example.com",
            "Delivery Status Notification (Failure)",
            "Address not found",
        );
        assert_eq!(
            engine.evaluate(&msg).map(|m| m.reason),
            Some("bounce / delivery failure".to_string())
        );
    }

    #[test]
    fn matches_out_of_office() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "bob@corp.com",
            "Automatic reply: Quick intro",
            "I am out of the office until Monday.",
        );
        assert!(engine.evaluate(&msg).is_some());
    }

    #[test]
    fn matches_unsubscribe_footer() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "updates@service.com",
            "Product update",
            "New features!\n\nClick here to unsubscribe from these emails.",
        );
        assert!(engine.evaluate(&msg).is_some());
    }

    #[test]
    fn quoted_footer_in_reply_is_ignored() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "jane@corp.com",
            "Re: Growing your team",
            "Thanks, interested - can we talk Tuesday?\n\n\
             On Mon, Mar 2, 2026 at 9:00 AM Sam <sam@acme.io> wrote:\n\
             > We help teams grow.\n\
             > Click here to unsubscribe",
        );
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn passes_through_human_reply() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "jane@corp.com",
            "Re: Partnership",
            "Thanks, interested — can we talk?",
        );
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn self_address_matches_exactly() {
        let engine = RulesEngine::empty().with_self_address("me@mycorp.com");
        let own = make_message("Me <me@mycorp.com>", "Hello", "Hi");
        let other = make_message("notme@mycorp.com", "Hello", "Hi");
        assert!(engine.evaluate(&own).is_some());
        assert!(engine.evaluate(&other).is_none());
    }

    #[test]
    fn empty_self_address_adds_nothing() {
        assert!(RulesEngine::empty().with_self_address("  ").is_empty());
    }

    #[test]
    fn exempt_sender_bypasses_rules() {
        let mut engine = RulesEngine::default_rules();
        engine.add_exempt_sender(r"(?i)noreply@vip\.com").unwrap();
        let msg = make_message("noreply@vip.com", "VIP message", "Important for you");
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn custom_rule() {
        let mut engine = RulesEngine::empty();
        engine
            .add_rule(r"(?i)@crm\.example\.com$", RuleField::Sender, "crm robot")
            .unwrap();
        let msg = make_message("bot@crm.example.com", "Hi", "Hello");
        assert_eq!(engine.evaluate(&msg).unwrap().reason, "crm robot");
    }

    #[test]
    fn invalid_custom_rule_is_rejected() {
        let mut engine = RulesEngine::empty();
        assert!(engine.add_rule("(unclosed", RuleField::Body, "bad").is_err());
        assert!(engine.is_empty());
    }
}
