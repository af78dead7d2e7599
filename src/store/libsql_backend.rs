//! libSQL backend for the processing ledger.
//!
//! Supports local file and in-memory databases. Only the file-backed form
//! satisfies the durability requirement; `new_memory` exists for tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::Category;
use crate::store::migrations;
use crate::store::traits::{LedgerEntry, ProcessingLedger};

/// libSQL-backed `ProcessingLedger`.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let ledger = Self::from_database(db).await?;
        info!(path = %path.display(), "Ledger database opened");
        Ok(ledger)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Record with an explicit timestamp. Same first-write-wins semantics as `record`.
    pub async fn record_at(
        &self,
        message_id: &str,
        category: Category,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO processing_ledger (message_id, category, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![message_id, category.as_str(), format_datetime(processed_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record: {e}")))?;

        let created = inserted > 0;
        debug!(id = message_id, category = %category, created, "Ledger record");
        Ok(created)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so text comparison orders by time.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_entry(row: &libsql::Row) -> Result<LedgerEntry, libsql::Error> {
    let message_id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let processed_at: String = row.get(2)?;
    Ok(LedgerEntry {
        message_id,
        category: Category::from_label(&category),
        processed_at: parse_datetime(&processed_at),
    })
}

#[async_trait]
impl ProcessingLedger for LibSqlLedger {
    async fn has_entry(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processing_ledger WHERE message_id = ?1 LIMIT 1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_entry: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_entry: {e}"))),
        }
    }

    async fn record(&self, message_id: &str, category: Category) -> Result<bool, DatabaseError> {
        self.record_at(message_id, category, Utc::now()).await
    }

    async fn get_entry(&self, message_id: &str) -> Result<Option<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, category, processed_at FROM processing_ledger
                 WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let entry = row_to_entry(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_entry row parse: {e}")))?;
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_entry: {e}"))),
        }
    }

    async fn count_entries(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM processing_ledger", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_entries: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_entries: {e}")))?;
                Ok(n.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_entries: {e}"))),
        }
    }

    async fn prune_entries(&self, keep_days: u32) -> Result<u64, DatabaseError> {
        // A window reaching past chrono's range keeps everything.
        let Some(cutoff) = chrono::Duration::try_days(i64::from(keep_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            debug!(keep_days, "Prune window exceeds representable dates, nothing to prune");
            return Ok(0);
        };
        let removed = self
            .conn()
            .execute(
                "DELETE FROM processing_ledger WHERE processed_at < ?1",
                params![format_datetime(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_entries: {e}")))?;

        info!(keep_days, removed, "Pruned ledger entries");
        Ok(removed)
    }
}
