//! Response composer: drafts and assembles the reply to a personal message.
//!
//! The generator writes the reply text only. Subject prefixing, signature and
//! quoting of the original follow ordinary mail reply conventions and are
//! done here, not by the model.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::channels::email_types::{quote_body, reply_subject, strip_quoted_text, truncate_chars};
use crate::channels::Message;
use crate::error::PipelineError;
use crate::llm::TextGenerator;
use crate::pipeline::classifier::PROMPT_BODY_LIMIT;
use crate::pipeline::retry::{with_retry, RetryPolicy};

/// Tone and sign-off for generated replies.
#[derive(Debug, Clone)]
pub struct ReplyStyle {
    pub tone: String,
    pub signature: Option<String>,
}

impl Default for ReplyStyle {
    fn default() -> Self {
        Self {
            tone: "friendly professional".to_string(),
            signature: None,
        }
    }
}

/// A reply ready for `MailboxClient::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub struct ResponseComposer {
    generator: Arc<dyn TextGenerator>,
    style: ReplyStyle,
    retry: RetryPolicy,
}

impl ResponseComposer {
    pub fn new(generator: Arc<dyn TextGenerator>, style: ReplyStyle, retry: RetryPolicy) -> Self {
        Self {
            generator,
            style,
            retry,
        }
    }

    /// Draft a reply to `message`.
    ///
    /// Fails with `PipelineError::Compose` if the generator errors after
    /// retries or returns nothing usable.
    pub async fn compose(&self, message: &Message) -> Result<ComposedReply, PipelineError> {
        let prompt = build_reply_prompt(message, &self.style);
        let raw = with_retry(&self.retry, "compose", || self.generator.generate(&prompt))
            .await
            .map_err(|e| {
                warn!(
                    id = %message.id,
                    model = self.generator.model_name(),
                    error = %e,
                    "Reply generation failed"
                );
                PipelineError::Compose(e.to_string())
            })?;

        let text = clean_generated_reply(&raw);
        if text.is_empty() {
            return Err(PipelineError::Compose("generator returned an empty reply".into()));
        }

        let reply = ComposedReply {
            to: message.sender.clone(),
            subject: reply_subject(&message.subject),
            body: assemble_body(&text, self.style.signature.as_deref(), message),
        };
        debug!(id = %message.id, to = %reply.to, subject = %reply.subject, "Composed reply");
        Ok(reply)
    }
}

/// Build the reply-drafting prompt.
pub fn build_reply_prompt(message: &Message, style: &ReplyStyle) -> String {
    let body = truncate_chars(&strip_quoted_text(&message.body), PROMPT_BODY_LIMIT);

    format!(
        "You are replying to an email that came in response to our outreach.\n\
         Write a short reply in a {tone} tone. Address what the sender actually said, \
         propose a concrete next step when they show interest, and do not invent facts.\n\
         Output only the reply text: no subject line, no greeting placeholders, no signature.\n\n\
         From: {sender}\n\
         Subject: {subject}\n\n\
         Their message:\n{body}\n",
        tone = style.tone,
        sender = message.sender,
        subject = message.subject,
    )
}

/// Trim whitespace and drop a leading `Subject:` line if the model added one.
fn clean_generated_reply(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_subject = match trimmed.split_once('\n') {
        Some((first, rest)) if first.trim_start().to_ascii_lowercase().starts_with("subject:") => {
            rest
        }
        _ => trimmed,
    };
    without_subject.trim().to_string()
}

/// Reply text, optional signature, then the quoted original.
fn assemble_body(text: &str, signature: Option<&str>, original: &Message) -> String {
    let mut body = String::with_capacity(text.len() + original.body.len() + 128);
    body.push_str(text);
    body.push_str("\n\n");

    if let Some(sig) = signature.map(str::trim).filter(|s| !s.is_empty()) {
        body.push_str(sig);
        body.push_str("\n\n");
    }

    body.push_str(&format!(
        "On {}, {} wrote:\n",
        original.received_at.format("%a, %b %-d, %Y at %H:%M UTC"),
        original.sender
    ));
    body.push_str(&quote_body(&original.body));
    body.push('\n');
    body
}
