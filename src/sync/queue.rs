//! Durable sync queue persistence.

use crate::storage::database::{Database, DatabaseError};
use crate::sync::{OpType, SyncPayload, SyncQueueEntry, SyncStatus};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use std::sync::{Arc, Mutex};

/// Attempts after which an entry is permanently parked as failed.
pub const MAX_ATTEMPTS: u32 = 5;

/// Fixed interval between retries of the same entry, in seconds.
///
/// Deliberately not exponential: client-side retry volume is low.
pub const RETRY_BACKOFF_SECS: i64 = 5;

/// Ordered, durable outbox of pending remote mutations.
#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<Mutex<Database>>,
}

struct EntryRow {
    id: i64,
    op_type: String,
    entity_type: String,
    entity_id: String,
    payload_json: String,
    attempts: u32,
    status: String,
    created_at: String,
    last_attempt_at: Option<String>,
}

impl SyncQueue {
    /// Create a new queue over the shared database.
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Append a new entry with status pending and zero attempts.
    ///
    /// The durable write is the only failure path.
    pub fn enqueue(
        &self,
        op_type: OpType,
        entity_type: &str,
        entity_id: &str,
        payload: &SyncPayload,
    ) -> Result<i64, DatabaseError> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let db = self.db.lock().unwrap();
        db.connection()
            .execute(
                "INSERT INTO sync_queue (op_type, entity_type, entity_id, payload_json,
                 attempts, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5)",
                params![
                    op_type.as_str(),
                    entity_type,
                    entity_id,
                    payload_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let id = db.connection().last_insert_rowid();
        tracing::debug!("Enqueued sync op {} for {} {}", id, entity_type, entity_id);
        Ok(id)
    }

    /// Entries with status pending or retrying, oldest-created first.
    pub fn list_pending(&self) -> Result<Vec<SyncQueueEntry>, DatabaseError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .connection()
            .prepare(
                "SELECT id, op_type, entity_type, entity_id, payload_json, attempts, status,
                 created_at, last_attempt_at
                 FROM sync_queue WHERE status IN ('pending', 'retrying')
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(EntryRow {
                    id: row.get(0)?,
                    op_type: row.get(1)?,
                    entity_type: row.get(2)?,
                    entity_id: row.get(3)?,
                    payload_json: row.get(4)?,
                    attempts: row.get(5)?,
                    status: row.get(6)?,
                    created_at: row.get(7)?,
                    last_attempt_at: row.get(8)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            entries.push(Self::row_to_entry(row)?);
        }
        Ok(entries)
    }

    /// Number of pending/retrying entries.
    pub fn count(&self) -> Result<u32, DatabaseError> {
        let db = self.db.lock().unwrap();
        db.connection()
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'retrying')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Transition an entry's status; when `attempts` is given, record it
    /// and stamp the last-attempt time.
    pub fn mark_status(
        &self,
        id: i64,
        status: SyncStatus,
        attempts: Option<u32>,
    ) -> Result<(), DatabaseError> {
        let db = self.db.lock().unwrap();
        match attempts {
            Some(attempts) => db
                .connection()
                .execute(
                    "UPDATE sync_queue SET status = ?2, attempts = ?3, last_attempt_at = ?4
                     WHERE id = ?1",
                    params![id, status.as_str(), attempts, Utc::now().to_rfc3339()],
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?,
            None => db
                .connection()
                .execute(
                    "UPDATE sync_queue SET status = ?2 WHERE id = ?1",
                    params![id, status.as_str()],
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?,
        };
        Ok(())
    }

    /// Delete an entry. Called only after confirmed remote success (or
    /// when the entry is established to be undeliverable).
    pub fn remove(&self, id: i64) -> Result<(), DatabaseError> {
        let db = self.db.lock().unwrap();
        db.connection()
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Bulk-delete failed entries. Operator/debug action.
    pub fn clear_failed(&self) -> Result<usize, DatabaseError> {
        let db = self.db.lock().unwrap();
        let removed = db
            .connection()
            .execute("DELETE FROM sync_queue WHERE status = 'failed'", [])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        if removed > 0 {
            tracing::info!("Cleared {} failed sync entries", removed);
        }
        Ok(removed)
    }

    /// Whether an entry may be attempted at `now`: pending/retrying,
    /// below the attempt cap, and either never attempted or past the
    /// fixed backoff interval.
    pub fn is_eligible(entry: &SyncQueueEntry, now: DateTime<Utc>) -> bool {
        if entry.status == SyncStatus::Failed || entry.attempts >= MAX_ATTEMPTS {
            return false;
        }
        match entry.last_attempt_at {
            None => true,
            Some(last) => now - last >= Duration::seconds(RETRY_BACKOFF_SECS),
        }
    }

    fn row_to_entry(row: EntryRow) -> Result<SyncQueueEntry, DatabaseError> {
        let op_type = OpType::parse(&row.op_type).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown op type: {}", row.op_type))
        })?;
        let status = SyncStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown sync status: {}", row.status))
        })?;

        Ok(SyncQueueEntry {
            id: row.id,
            op_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            payload_json: row.payload_json,
            attempts: row.attempts,
            status,
            created_at: parse_timestamp(&row.created_at)?,
            last_attempt_at: row
                .last_attempt_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))
}
