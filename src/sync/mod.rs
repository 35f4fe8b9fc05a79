//! Remote Sync
//!
//! Durable outbox of not-yet-confirmed remote mutations plus the
//! background processor that drains it. Local state is authoritative;
//! everything here is eventually-consistent best-effort.

pub mod backend;
pub mod processor;
pub mod queue;

use crate::session::types::{WeightUnit, WorkoutSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use backend::{BackendError, HttpBackend, RemoteBackend};
pub use processor::SyncProcessor;
pub use queue::{SyncQueue, MAX_ATTEMPTS, RETRY_BACKOFF_SECS};

/// Sync-related errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Durable queue read/write failure
    #[error("Queue storage error: {0}")]
    Storage(#[from] crate::storage::database::DatabaseError),

    /// Remote call failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Stored payload could not be decoded
    #[error("Malformed queue payload: {0}")]
    MalformedPayload(String),

    /// Operation needs a server-assigned id the create has not produced yet
    #[error("Remote id not yet assigned for {0}")]
    MissingRemoteId(String),
}

/// Kind of remote mutation an outbox entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Entity creation
    Create,
    /// Entity mutation
    Update,
    /// Entity removal
    Delete,
}

impl OpType {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Create => "create",
            OpType::Update => "update",
            OpType::Delete => "delete",
        }
    }

    /// Parse the database column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(OpType::Create),
            "update" => Some(OpType::Update),
            "delete" => Some(OpType::Delete),
            _ => None,
        }
    }
}

/// Processing status of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never attempted
    Pending,
    /// Attempted and failed; waiting out the backoff interval
    Retrying,
    /// Attempts exhausted; parked until an operator clears it
    Failed,
}

impl SyncStatus {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Retrying => "retrying",
            SyncStatus::Failed => "failed",
        }
    }

    /// Parse the database column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "retrying" => Some(SyncStatus::Retrying),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// A durable record of one pending remote mutation.
#[derive(Debug, Clone)]
pub struct SyncQueueEntry {
    /// Queue row id
    pub id: i64,
    /// Mutation kind
    pub op_type: OpType,
    /// Entity kind ("session")
    pub entity_type: String,
    /// Entity correlation key (session UUID)
    pub entity_id: String,
    /// Operation payload, decoded lazily so one malformed row cannot
    /// stall the rest of the queue
    pub payload_json: String,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Processing status
    pub status: SyncStatus,
    /// When the entry was enqueued
    pub created_at: DateTime<Utc>,
    /// When the entry was last attempted
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl SyncQueueEntry {
    /// Decode the stored operation payload.
    pub fn payload(&self) -> Result<SyncPayload, SyncError> {
        serde_json::from_str(&self.payload_json)
            .map_err(|e| SyncError::MalformedPayload(e.to_string()))
    }
}

/// Operation payload carried by an outbox entry.
///
/// One variant per operation kind so the processor's dispatch is
/// exhaustive; each carries order/set-number addressing so entries apply
/// correctly regardless of delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncPayload {
    /// Initial session upload
    Create {
        /// Snapshot of the session at creation time
        session: Box<WorkoutSession>,
        /// Remote user the session belongs to
        remote_user_id: i64,
    },
    /// A set was logged (or re-edited)
    SetComplete {
        session_uuid: Uuid,
        set_id: String,
        exercise_order: u32,
        set_number: u32,
        reps: u32,
        weight: f64,
        unit: WeightUnit,
        completed_at: DateTime<Utc>,
    },
    /// An extra set was appended mid-session
    AddSet {
        session_uuid: Uuid,
        exercise_order: u32,
        set_number: u32,
        unit: WeightUnit,
    },
    /// A personal note was written on an exercise
    ExerciseNote {
        session_uuid: Uuid,
        exercise_order: u32,
        note: String,
    },
    /// The session was finished
    Complete {
        session_uuid: Uuid,
        ended_at: DateTime<Utc>,
    },
    /// The session was discarded
    Abandon {
        session_uuid: Uuid,
        ended_at: DateTime<Utc>,
    },
}

impl SyncPayload {
    /// The queue-level op type this payload maps to.
    pub fn op_type(&self) -> OpType {
        match self {
            SyncPayload::Create { .. } => OpType::Create,
            _ => OpType::Update,
        }
    }

    /// The session this payload addresses.
    pub fn session_uuid(&self) -> Uuid {
        match self {
            SyncPayload::Create { session, .. } => session.uuid,
            SyncPayload::SetComplete { session_uuid, .. }
            | SyncPayload::AddSet { session_uuid, .. }
            | SyncPayload::ExerciseNote { session_uuid, .. }
            | SyncPayload::Complete { session_uuid, .. }
            | SyncPayload::Abandon { session_uuid, .. } => *session_uuid,
        }
    }
}

/// Events published to the presentation layer by the sync processor.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An entry exhausted its attempts and was parked as failed.
    ///
    /// The only sync condition surfaced to the user; silent retries
    /// cover everything else.
    EntryFailed {
        entry_id: i64,
        entity_type: String,
        entity_id: String,
    },
}
