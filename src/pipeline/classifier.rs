//! Message classifier: personal vs automated.
//!
//! Flow:
//! 1. Rules engine (fast, no generator call) may short-circuit to `Automated`
//! 2. Generator call with a fixed prompt, retried on transport errors only
//! 3. Label normalization into the closed `Category` set
//!
//! Ambiguous output is a terminal `Unknown`, never a retry trigger.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::email_types::{strip_quoted_text, truncate_chars};
use crate::channels::Message;
use crate::error::PipelineError;
use crate::llm::TextGenerator;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::Category;

/// Max body characters embedded in a prompt.
pub const PROMPT_BODY_LIMIT: usize = 2000;

/// Classifies inbound messages into `Category`.
pub struct MessageClassifier {
    generator: Arc<dyn TextGenerator>,
    rules: RulesEngine,
    retry: RetryPolicy,
}

impl MessageClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, rules: RulesEngine, retry: RetryPolicy) -> Self {
        Self {
            generator,
            rules,
            retry,
        }
    }

    /// Classify one message.
    ///
    /// Returns `Err(PipelineError::Classify)` only when the generator call
    /// itself fails after retries. Callers treat that like `Unknown`.
    pub async fn classify(&self, message: &Message) -> Result<Category, PipelineError> {
        if let Some(hit) = self.rules.evaluate(message) {
            info!(
                id = %message.id,
                rule = %hit.pattern,
                reason = %hit.reason,
                "Rules engine matched, skipping generator"
            );
            return Ok(Category::Automated);
        }

        let prompt = build_classification_prompt(message);
        let raw = with_retry(&self.retry, "classify", || self.generator.generate(&prompt))
            .await
            .map_err(|e| {
                warn!(
                    id = %message.id,
                    model = self.generator.model_name(),
                    error = %e,
                    "Classification call failed"
                );
                PipelineError::Classify(e.to_string())
            })?;

        let category = parse_category(&raw);
        debug!(
            id = %message.id,
            raw = %truncate_chars(raw.trim(), 80),
            category = %category,
            "Classified message"
        );
        Ok(category)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classification prompt for a message.
pub fn build_classification_prompt(message: &Message) -> String {
    let body = truncate_chars(&strip_quoted_text(&message.body), PROMPT_BODY_LIMIT);

    let mut prompt = String::with_capacity(512 + body.len());
    prompt.push_str(
        "You classify incoming emails that arrived in reply to an outreach message.\n\n\
         Categories:\n\
         - personal: written by a human to us (a reply, question, objection, or referral)\n\
         - automated: bounces, delivery failures, out-of-office replies, newsletters, \
         notifications, receipts, or any machine-generated mail\n\n\
         Answer with exactly one word: personal or automated.\n\n",
    );
    prompt.push_str(&format!("From: {}\n", message.sender));
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!("\nBody:\n{}\n", body));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Map raw generator output onto the closed category set.
///
/// Case-insensitive, tolerant of punctuation and surrounding words. Output
/// naming both labels, or neither, is `Unknown`.
pub fn parse_category(raw: &str) -> Category {
    let lower = raw.to_lowercase();
    let mut personal = false;
    let mut automated = false;

    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        match word {
            "personal" => personal = true,
            "automated" => automated = true,
            _ => {}
        }
    }

    match (personal, automated) {
        (true, false) => Category::Personal,
        (false, true) => Category::Automated,
        _ => Category::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::error::LlmError;

    /// Replays scripted results in order, repeating the last one.
    struct ScriptedGenerator {
        script: Mutex<Vec<Result<String, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn clone_result(r: &Result<String, LlmError>) -> Result<String, LlmError> {
        match r {
            Ok(s) => Ok(s.clone()),
            Err(LlmError::Timeout { provider, timeout }) => Err(LlmError::Timeout {
                provider: provider.clone(),
                timeout: *timeout,
            }),
            Err(e) => Err(LlmError::InvalidResponse {
                provider: "stub".into(),
                reason: e.to_string(),
            }),
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap();
            let idx = n.min(script.len() - 1);
            clone_result(&script[idx])
        }
    }

    fn timeout() -> Result<String, LlmError> {
        Err(LlmError::Timeout {
            provider: "stub".into(),
            timeout: Duration::from_secs(1),
        })
    }

    fn make_message(sender: &str, subject: &str, body: &str) -> Message {
        Message {
            id: "m-1".into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    fn classifier(generator: Arc<ScriptedGenerator>) -> MessageClassifier {
        MessageClassifier::new(
            generator,
            RulesEngine::default_rules(),
            RetryPolicy::immediate(3),
        )
    }

    // ── parse_category ──────────────────────────────────────────────

    #[test]
    fn parse_plain_labels() {
        assert_eq!(parse_category("personal"), Category::Personal);
        assert_eq!(parse_category("Automated"), Category::Automated);
        assert_eq!(parse_category("  PERSONAL.\n"), Category::Personal);
    }

    #[test]
    fn parse_label_with_extra_text() {
        assert_eq!(
            parse_category("Category: automated (bounce notice)"),
            Category::Automated
        );
        assert_eq!(parse_category("**personal**"), Category::Personal);
    }

    #[test]
    fn parse_ambiguous_is_unknown() {
        assert_eq!(parse_category("personal or automated"), Category::Unknown);
        assert_eq!(parse_category("I'm not sure"), Category::Unknown);
        assert_eq!(parse_category(""), Category::Unknown);
        assert_eq!(parse_category("impersonal"), Category::Unknown);
    }

    #[test]
    fn parse_is_closed_over_arbitrary_output() {
        for raw in ["spam", "human", "42", "🤖", "automatedpersonal", "personal\nautomated"] {
            let c = parse_category(raw);
            assert!(matches!(
                c,
                Category::Personal | Category::Automated | Category::Unknown
            ));
        }
    }

    // ── prompt ──────────────────────────────────────────────────────

    #[test]
    fn prompt_embeds_fields_and_strips_quotes() {
        let msg = make_message(
            "jane@corp.com",
            "Re: Intro",
            "Sounds great!\n\nOn Mon, Jan 5, 2026 at 9:00 AM Us <us@x.com> wrote:\n> our pitch",
        );
        let prompt = build_classification_prompt(&msg);
        assert!(prompt.contains("From: jane@corp.com"));
        assert!(prompt.contains("Subject: Re: Intro"));
        assert!(prompt.contains("Sounds great!"));
        assert!(!prompt.contains("our pitch"));
    }

    #[test]
    fn prompt_truncates_long_body() {
        let body = "x".repeat(PROMPT_BODY_LIMIT + 500);
        let prompt = build_classification_prompt(&make_message("a@b.com", "s", &body));
        assert!(prompt.len() < PROMPT_BODY_LIMIT + 1000);
    }

    // ── classify ────────────────────────────────────────────────────

    #[tokio::test]
    async fn classify_uses_generator_output() {
        let generator = ScriptedGenerator::new(vec![Ok("Personal".into())]);
        let c = classifier(generator.clone());
        let msg = make_message("jane@corp.com", "Re: Intro", "Can we talk?");
        assert_eq!(c.classify(&msg).await.unwrap(), Category::Personal);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn rules_short_circuit_generator() {
        let generator = ScriptedGenerator::new(vec![Ok("personal".into())]);
        let c = classifier(generator.clone());
        let msg = make_message("noreply@shop.com", "Your order", "Thanks");
        assert_eq!(c.classify(&msg).await.unwrap(), Category::Automated);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn reply_quoting_a_marketing_footer_reaches_generator() {
        let generator = ScriptedGenerator::new(vec![Ok("personal".into())]);
        let c = classifier(generator.clone());
        let msg = make_message(
            "jane@corp.com",
            "Re: Growing your team",
            "Thanks, interested - can we talk Tuesday?\n\n\
             On Mon, Mar 2, 2026 at 9:00 AM Sam <sam@acme.io> wrote:\n\
             > We help teams grow.\n\
             > Click here to unsubscribe",
        );
        assert_eq!(c.classify(&msg).await.unwrap(), Category::Personal);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn ambiguous_output_not_retried() {
        let generator = ScriptedGenerator::new(vec![Ok("maybe?".into())]);
        let c = classifier(generator.clone());
        let msg = make_message("jane@corp.com", "Hi", "Hello");
        assert_eq!(c.classify(&msg).await.unwrap(), Category::Unknown);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_retried_then_succeeds() {
        let generator = ScriptedGenerator::new(vec![timeout(), Ok("automated".into())]);
        let c = classifier(generator.clone());
        let msg = make_message("jane@corp.com", "Hi", "Hello");
        assert_eq!(c.classify(&msg).await.unwrap(), Category::Automated);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn transport_error_exhausted_is_classify_error() {
        let generator = ScriptedGenerator::new(vec![timeout()]);
        let c = classifier(generator.clone());
        let msg = make_message("jane@corp.com", "Hi", "Hello");
        let err = c.classify(&msg).await.unwrap_err();
        assert!(matches!(err, PipelineError::Classify(_)));
        assert_eq!(generator.calls(), 3);
    }
}
