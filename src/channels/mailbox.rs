//! Mailbox abstraction: the provider-facing side of the pipeline.
//!
//! The poller only ever talks to a mailbox through `MailboxClient`, so the
//! IMAP/SMTP implementation and the in-test stubs are interchangeable.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// One inbound email, as fetched from the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable provider identifier (Message-ID header for IMAP). Ledger key.
    pub id: String,
    /// Sender email address.
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Used only to order messages within a batch.
    pub received_at: DateTime<Utc>,
}

/// Processing outcome label written back to the mailbox for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    AutoReplied,
    Automated,
    NeedsReview,
    SendFailed,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoReplied => "auto-replied",
            Self::Automated => "automated",
            Self::NeedsReview => "needs-review",
            Self::SendFailed => "send-failed",
        }
    }

    pub fn all() -> [Tag; 4] {
        [
            Self::AutoReplied,
            Self::Automated,
            Self::NeedsReview,
            Self::SendFailed,
        ]
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mailbox provider operations consumed by the pipeline.
///
/// Every call may fail transiently (retry) or permanently (give up);
/// see `MailboxError::is_transient`.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Provider name for logs (e.g. "imap").
    fn name(&self) -> &str;

    /// Fetch messages not yet carrying any processing tag.
    async fn fetch_new(&self) -> Result<Vec<Message>, MailboxError>;

    /// Send a plain-text email.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError>;

    /// Attach a processing tag to a message.
    async fn apply_tag(&self, message_id: &str, tag: Tag) -> Result<(), MailboxError>;
}
