//! `ProcessingLedger` trait: the durable at-most-once record of processed messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::Category;

/// The fact that a message completed one full processing pass.
///
/// Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub message_id: String,
    pub category: Category,
    pub processed_at: DateTime<Utc>,
}

/// Durable store of processed message ids.
///
/// Implementations must survive process restarts and be safe for
/// concurrent calls on distinct ids.
#[async_trait]
pub trait ProcessingLedger: Send + Sync {
    /// Whether `message_id` already has an entry.
    async fn has_entry(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Record `message_id` as processed.
    ///
    /// Idempotent: the first write wins. Returns `true` if this call created
    /// the entry, `false` if one already existed.
    async fn record(&self, message_id: &str, category: Category) -> Result<bool, DatabaseError>;

    /// Fetch a single entry.
    async fn get_entry(&self, message_id: &str) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Total number of entries.
    async fn count_entries(&self) -> Result<u64, DatabaseError>;

    /// Maintenance only: delete entries older than `keep_days`. Returns rows removed.
    async fn prune_entries(&self, keep_days: u32) -> Result<u64, DatabaseError>;
}
