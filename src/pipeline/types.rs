//! Shared types for the message processing pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Category ────────────────────────────────────────────────────────

/// Classification result for one inbound message.
///
/// Closed set: anything the generator says that is not clearly one of the
/// two labels becomes `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A genuine human reply.
    Personal,
    /// Bounce, auto-reply, newsletter, notification.
    Automated,
    /// Classification failed or the output was ambiguous.
    Unknown,
}

impl Category {
    /// Stable storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Automated => "automated",
            Self::Unknown => "unknown",
        }
    }

    /// Inverse of `as_str`. Unrecognized labels map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "personal" => Self::Personal,
            "automated" => Self::Automated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Per-message outcome ─────────────────────────────────────────────

/// What one processing pass did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Already in the ledger; nothing done.
    Skipped,
    /// Reply sent, ledger written, tagged `auto-replied`.
    Replied,
    /// Tagged `automated`, ledger written, no reply.
    Automated,
    /// Classification failed or was ambiguous; tagged `needs-review`, ledger written.
    NeedsReview,
    /// Permanent send failure; tagged `send-failed`, ledger written.
    SendFailed,
    /// Left untouched for the next cycle: no ledger entry, no tag.
    Deferred { reason: String },
}

impl MessageOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Replied => "replied",
            Self::Automated => "automated",
            Self::NeedsReview => "needs_review",
            Self::SendFailed => "send_failed",
            Self::Deferred { .. } => "deferred",
        }
    }
}

// ── Batch report ────────────────────────────────────────────────────

/// Counts for one `process_batch` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub fetched: usize,
    pub skipped: usize,
    pub replied: usize,
    pub automated: usize,
    pub needs_review: usize,
    pub send_failed: usize,
    pub deferred: usize,
}

impl BatchReport {
    pub fn tally(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Skipped => self.skipped += 1,
            MessageOutcome::Replied => self.replied += 1,
            MessageOutcome::Automated => self.automated += 1,
            MessageOutcome::NeedsReview => self.needs_review += 1,
            MessageOutcome::SendFailed => self.send_failed += 1,
            MessageOutcome::Deferred { .. } => self.deferred += 1,
        }
    }

    /// Messages that reached a terminal state this batch (got a ledger entry).
    pub fn completed(&self) -> usize {
        self.replied + self.automated + self.needs_review + self.send_failed
    }
}
