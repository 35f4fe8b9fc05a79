//! Workout session persistence.
//!
//! Durable storage is the source of truth for the active session; the
//! controller's in-memory copy is a cache refreshed from these reads.

use crate::session::types::{NavState, SessionExercise, SessionStatus, WorkoutSession};
use crate::storage::database::{Database, DatabaseError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::params;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Typed store for workout sessions and the persisted navigation state.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Mutex<Database>>,
}

/// Raw row columns before parsing.
struct SessionRow {
    id: i64,
    uuid: String,
    remote_id: Option<i64>,
    user_id: i64,
    routine_id: i64,
    routine_name: String,
    date: String,
    started_at: String,
    ended_at: Option<String>,
    duration_seconds: Option<i64>,
    status: String,
    exercises_json: String,
    synced_at: Option<String>,
}

const SESSION_COLUMNS: &str = "id, uuid, remote_id, user_id, routine_id, routine_name, date, \
     started_at, ended_at, duration_seconds, status, exercises_json, synced_at";

impl SessionStore {
    /// Create a new session store over the shared database.
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Insert a new session, assigning its local id.
    pub fn insert_session(&self, session: &mut WorkoutSession) -> Result<i64, DatabaseError> {
        let exercises_json = serde_json::to_string(&session.exercises)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let db = self.db.lock().unwrap();
        db.connection()
            .execute(
                "INSERT INTO workout_sessions (uuid, remote_id, user_id, routine_id, routine_name,
                 date, started_at, ended_at, duration_seconds, status, exercises_json, synced_at,
                 created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    session.uuid.to_string(),
                    session.remote_id,
                    session.user_id,
                    session.routine_id,
                    session.routine_name,
                    session.date.to_string(),
                    session.started_at.to_rfc3339(),
                    session.ended_at.map(|t| t.to_rfc3339()),
                    session.duration_seconds,
                    session.status.as_str(),
                    exercises_json,
                    session.synced_at.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let id = db.connection().last_insert_rowid();
        session.id = Some(id);
        Ok(id)
    }

    /// Get a session by local id.
    pub fn get_session(&self, id: i64) -> Result<Option<WorkoutSession>, DatabaseError> {
        self.query_one(
            &format!("SELECT {SESSION_COLUMNS} FROM workout_sessions WHERE id = ?1"),
            params![id],
        )
    }

    /// Get a session by its client-generated correlation key.
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<WorkoutSession>, DatabaseError> {
        self.query_one(
            &format!("SELECT {SESSION_COLUMNS} FROM workout_sessions WHERE uuid = ?1"),
            params![uuid.to_string()],
        )
    }

    /// Find the user's in-progress session, if any.
    pub fn find_in_progress(&self, user_id: i64) -> Result<Option<WorkoutSession>, DatabaseError> {
        self.query_one(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM workout_sessions
                 WHERE user_id = ?1 AND status = 'in_progress'
                 ORDER BY started_at DESC LIMIT 1"
            ),
            params![user_id],
        )
    }

    /// Most recent completed sessions for a user, newest first.
    pub fn recent_completed(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<WorkoutSession>, DatabaseError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .connection()
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM workout_sessions
                 WHERE user_id = ?1 AND status = 'completed'
                 ORDER BY started_at DESC LIMIT ?2"
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![user_id, limit], Self::map_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            sessions.push(Self::row_to_session(row)?);
        }
        Ok(sessions)
    }

    /// Persist the full state of an existing session.
    pub fn update_session(&self, session: &WorkoutSession) -> Result<(), DatabaseError> {
        let id = session
            .id
            .ok_or_else(|| DatabaseError::NotFound("session has no local id".to_string()))?;

        let exercises_json = serde_json::to_string(&session.exercises)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let db = self.db.lock().unwrap();
        let updated = db
            .connection()
            .execute(
                "UPDATE workout_sessions SET remote_id = ?2, ended_at = ?3,
                 duration_seconds = ?4, status = ?5, exercises_json = ?6, synced_at = ?7
                 WHERE id = ?1",
                params![
                    id,
                    session.remote_id,
                    session.ended_at.map(|t| t.to_rfc3339()),
                    session.duration_seconds,
                    session.status.as_str(),
                    exercises_json,
                    session.synced_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    /// Delete a session by local id.
    pub fn delete_session(&self, id: i64) -> Result<(), DatabaseError> {
        let db = self.db.lock().unwrap();
        db.connection()
            .execute("DELETE FROM workout_sessions WHERE id = ?1", params![id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Persist the navigation sub-state (single row, replace semantics).
    pub fn save_nav_state(&self, nav: &NavState) -> Result<(), DatabaseError> {
        let state_json = serde_json::to_string(nav)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let db = self.db.lock().unwrap();
        db.connection()
            .execute(
                "INSERT INTO nav_state (id, state_json, saved_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET state_json = ?1, saved_at = ?2",
                params![state_json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Load the persisted navigation sub-state.
    ///
    /// Corrupted or missing state must never block session recovery, so
    /// every failure collapses to `None`.
    pub fn load_nav_state(&self) -> Option<NavState> {
        let db = self.db.lock().unwrap();
        let state_json: String = match db.connection().query_row(
            "SELECT state_json FROM nav_state WHERE id = 1",
            [],
            |row| row.get(0),
        ) {
            Ok(json) => json,
            Err(rusqlite::Error::QueryReturnedNoRows) => return None,
            Err(e) => {
                tracing::debug!("Failed to read nav state: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&state_json) {
            Ok(nav) => Some(nav),
            Err(e) => {
                tracing::debug!("Discarding corrupted nav state: {}", e);
                None
            }
        }
    }

    /// Drop the persisted navigation sub-state.
    pub fn clear_nav_state(&self) -> Result<(), DatabaseError> {
        let db = self.db.lock().unwrap();
        db.connection()
            .execute("DELETE FROM nav_state WHERE id = 1", [])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn query_one(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<WorkoutSession>, DatabaseError> {
        let db = self.db.lock().unwrap();
        let result = db.connection().query_row(sql, params, Self::map_row);

        match result {
            Ok(row) => Ok(Some(Self::row_to_session(row)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            uuid: row.get(1)?,
            remote_id: row.get(2)?,
            user_id: row.get(3)?,
            routine_id: row.get(4)?,
            routine_name: row.get(5)?,
            date: row.get(6)?,
            started_at: row.get(7)?,
            ended_at: row.get(8)?,
            duration_seconds: row.get(9)?,
            status: row.get(10)?,
            exercises_json: row.get(11)?,
            synced_at: row.get(12)?,
        })
    }

    fn row_to_session(row: SessionRow) -> Result<WorkoutSession, DatabaseError> {
        let exercises: Vec<SessionExercise> = serde_json::from_str(&row.exercises_json)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let status = SessionStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown session status: {}", row.status))
        })?;

        Ok(WorkoutSession {
            id: Some(row.id),
            remote_id: row.remote_id,
            uuid: Uuid::parse_str(&row.uuid)
                .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
            user_id: row.user_id,
            routine_id: row.routine_id,
            routine_name: row.routine_name,
            date: row
                .date
                .parse::<NaiveDate>()
                .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
            started_at: parse_timestamp(&row.started_at)?,
            ended_at: row.ended_at.as_deref().map(parse_timestamp).transpose()?,
            duration_seconds: row.duration_seconds,
            status,
            exercises,
            synced_at: row.synced_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{SessionView, WeightUnit, WorkoutSet};

    fn test_store() -> SessionStore {
        let db = Database::open_in_memory().unwrap();
        SessionStore::new(Arc::new(Mutex::new(db)))
    }

    fn test_session(user_id: i64) -> WorkoutSession {
        WorkoutSession {
            id: None,
            remote_id: None,
            uuid: Uuid::new_v4(),
            user_id,
            routine_id: 7,
            routine_name: "Push Day".to_string(),
            date: Utc::now().date_naive(),
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            status: SessionStatus::InProgress,
            exercises: vec![SessionExercise {
                exercise_id: 42,
                remote_id: None,
                name: "Bench Press".to_string(),
                order: 0,
                rest_seconds: 90,
                sets: vec![WorkoutSet {
                    id: Uuid::new_v4().to_string(),
                    remote_id: None,
                    set_number: 1,
                    target_reps: 10,
                    reps: 10,
                    target_weight: 60.0,
                    weight: 60.0,
                    unit: WeightUnit::Kg,
                    completed: false,
                    completed_at: None,
                    feedback: None,
                }],
                note: None,
            }],
            synced_at: None,
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = test_store();
        let mut session = test_session(1);

        let id = store.insert_session(&mut session).unwrap();
        assert_eq!(session.id, Some(id));

        let loaded = store.get_session(id).unwrap().unwrap();
        assert_eq!(loaded.uuid, session.uuid);
        assert_eq!(loaded.exercises.len(), 1);
        assert_eq!(loaded.exercises[0].sets[0].set_number, 1);
        assert_eq!(loaded.status, SessionStatus::InProgress);
    }

    #[test]
    fn test_get_by_uuid() {
        let store = test_store();
        let mut session = test_session(1);
        store.insert_session(&mut session).unwrap();

        let loaded = store.get_by_uuid(&session.uuid).unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().id, session.id);
    }

    #[test]
    fn test_find_in_progress_filters_by_user_and_status() {
        let store = test_store();
        let mut mine = test_session(1);
        let mut theirs = test_session(2);
        store.insert_session(&mut mine).unwrap();
        store.insert_session(&mut theirs).unwrap();

        let found = store.find_in_progress(1).unwrap().unwrap();
        assert_eq!(found.id, mine.id);

        let mut done = store.get_session(mine.id.unwrap()).unwrap().unwrap();
        done.status = SessionStatus::Completed;
        store.update_session(&done).unwrap();
        assert!(store.find_in_progress(1).unwrap().is_none());
    }

    #[test]
    fn test_recent_completed_is_bounded_and_newest_first() {
        let store = test_store();
        for i in 0..4 {
            let mut session = test_session(1);
            session.status = SessionStatus::Completed;
            session.started_at = Utc::now() - chrono::Duration::days(i);
            store.insert_session(&mut session).unwrap();
        }

        let recent = store.recent_completed(1, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].started_at > recent[1].started_at);
    }

    #[test]
    fn test_delete_session() {
        let store = test_store();
        let mut session = test_session(1);
        let id = store.insert_session(&mut session).unwrap();
        store.delete_session(id).unwrap();
        assert!(store.get_session(id).unwrap().is_none());
    }

    #[test]
    fn test_nav_state_round_trip_and_corruption() {
        let store = test_store();
        assert!(store.load_nav_state().is_none());

        let nav = NavState {
            view: SessionView::Logging,
            selected_exercise_index: 2,
        };
        store.save_nav_state(&nav).unwrap();
        assert_eq!(store.load_nav_state(), Some(nav));

        // Corrupted JSON is silently discarded
        {
            let db = store.db.lock().unwrap();
            db.connection()
                .execute("UPDATE nav_state SET state_json = 'not json' WHERE id = 1", [])
                .unwrap();
        }
        assert!(store.load_nav_state().is_none());

        store.clear_nav_state().unwrap();
    }
}
