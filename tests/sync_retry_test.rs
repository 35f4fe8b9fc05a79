//! Integration tests for the sync queue and its background processor.

use chrono::{DateTime, Utc};
use repforge::session::controller::{NoopRotation, SessionController};
use repforge::session::types::{RoutineExercise, RoutineSnapshot, SessionStatus, WeightUnit};
use repforge::storage::database::Database;
use repforge::storage::session_store::SessionStore;
use repforge::sync::backend::{
    BackendError, CreateSessionRequest, RemoteBackend, RemoteExerciseIds, RemoteSessionIds,
    RemoteSetIds, SetUpdate,
};
use repforge::sync::queue::{SyncQueue, MAX_ATTEMPTS};
use repforge::sync::{SyncEvent, SyncPayload, SyncProcessor, SyncStatus};
use repforge::timer::{RestTimer, SystemClock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Scriptable in-memory backend.
#[derive(Default)]
struct MockBackend {
    fail_all: AtomicBool,
    not_found: AtomicBool,
    next_id: AtomicI64,
    creates: AtomicU32,
    set_updates: Mutex<Vec<(i64, Option<u32>)>>,
    finalizations: Mutex<Vec<(i64, SessionStatus)>>,
    notes: Mutex<Vec<(i64, u32, String)>>,
}

impl MockBackend {
    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1000
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.not_found.load(Ordering::SeqCst) {
            return Err(BackendError::NotFound);
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

impl RemoteBackend for MockBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<RemoteSessionIds, BackendError> {
        self.check()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteSessionIds {
            session_id: self.next(),
            exercises: request
                .exercises
                .iter()
                .map(|exercise| RemoteExerciseIds {
                    order: exercise.order,
                    exercise_id: self.next(),
                    sets: exercise
                        .sets
                        .iter()
                        .map(|set| RemoteSetIds {
                            set_number: set.set_number,
                            set_id: self.next(),
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    async fn update_set(
        &self,
        remote_set_id: i64,
        update: &SetUpdate,
    ) -> Result<(), BackendError> {
        self.check()?;
        self.set_updates
            .lock()
            .unwrap()
            .push((remote_set_id, update.reps));
        Ok(())
    }

    async fn add_set(
        &self,
        _remote_exercise_id: i64,
        _set_number: u32,
        _unit: WeightUnit,
    ) -> Result<i64, BackendError> {
        self.check()?;
        Ok(self.next())
    }

    async fn update_exercise_note(
        &self,
        remote_session_id: i64,
        exercise_order: u32,
        note: &str,
    ) -> Result<(), BackendError> {
        self.check()?;
        self.notes
            .lock()
            .unwrap()
            .push((remote_session_id, exercise_order, note.to_string()));
        Ok(())
    }

    async fn finalize_session(
        &self,
        remote_session_id: i64,
        _ended_at: DateTime<Utc>,
        status: SessionStatus,
    ) -> Result<(), BackendError> {
        self.check()?;
        self.finalizations
            .lock()
            .unwrap()
            .push((remote_session_id, status));
        Ok(())
    }
}

struct Harness {
    controller: SessionController,
    processor: Arc<SyncProcessor<Arc<MockBackend>>>,
    backend: Arc<MockBackend>,
    queue: SyncQueue,
    store: SessionStore,
    db: Arc<Mutex<Database>>,
}

fn harness() -> Harness {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let store = SessionStore::new(db.clone());
    let queue = SyncQueue::new(db.clone());
    let timer = Arc::new(Mutex::new(RestTimer::new(Arc::new(SystemClock))));
    let backend = Arc::new(MockBackend::default());
    let controller = SessionController::new(
        store.clone(),
        queue.clone(),
        timer,
        Arc::new(NoopRotation),
        WeightUnit::Kg,
    );
    let processor = Arc::new(SyncProcessor::new(
        backend.clone(),
        queue.clone(),
        store.clone(),
    ));
    Harness {
        controller,
        processor,
        backend,
        queue,
        store,
        db,
    }
}

fn routine() -> RoutineSnapshot {
    RoutineSnapshot {
        id: 3,
        name: "Pull Day".to_string(),
        exercises: vec![RoutineExercise {
            exercise_id: 21,
            name: "Deadlift".to_string(),
            target_sets: 2,
            target_reps: "5".to_string(),
            rest_seconds: 180,
        }],
    }
}

/// Backdate last-attempt stamps so entries are immediately eligible
/// again without waiting out the real backoff interval.
fn expire_backoff(db: &Arc<Mutex<Database>>) {
    let stamp = (Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
    db.lock()
        .unwrap()
        .connection()
        .execute(
            "UPDATE sync_queue SET last_attempt_at = ?1",
            [stamp.as_str()],
        )
        .unwrap();
}

#[tokio::test]
async fn create_reconciles_server_assigned_ids() {
    let mut h = harness();
    let session = h.controller.start_workout(&routine(), 1, 500).unwrap();
    assert_eq!(h.queue.count().unwrap(), 1);

    h.processor.drain().await;

    assert_eq!(h.queue.count().unwrap(), 0);
    let synced = h.store.get_session(session.id.unwrap()).unwrap().unwrap();
    assert!(synced.remote_id.is_some());
    assert!(synced.synced_at.is_some());
    assert!(synced.exercises[0].remote_id.is_some());
    assert!(synced.exercises[0].sets.iter().all(|s| s.remote_id.is_some()));
}

#[tokio::test]
async fn set_completion_syncs_after_create() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    let set_id = h.controller.active_session().unwrap().exercises[0].sets[0]
        .id
        .clone();
    h.controller
        .complete_set(0, &set_id, 140.0, 5, WeightUnit::Kg)
        .unwrap();

    // One pass handles both the create and the set update, in order
    h.processor.drain().await;

    assert_eq!(h.queue.count().unwrap(), 0);
    let updates = h.backend.set_updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, Some(5));
}

#[tokio::test]
async fn set_completion_waits_for_create_when_backend_is_down() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();

    // Create fails; both entries survive
    h.backend.fail_all.store(true, Ordering::SeqCst);
    h.processor.drain().await;

    let set_id = h.controller.active_session().unwrap().exercises[0].sets[0]
        .id
        .clone();
    h.controller
        .complete_set(0, &set_id, 140.0, 5, WeightUnit::Kg)
        .unwrap();
    assert_eq!(h.queue.count().unwrap(), 2);

    // Backend recovers; oldest-first ordering syncs the create before
    // the set update needs its remote id
    h.backend.fail_all.store(false, Ordering::SeqCst);
    expire_backoff(&h.db);
    h.processor.drain().await;

    assert_eq!(h.queue.count().unwrap(), 0);
    assert_eq!(h.backend.set_updates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn five_failures_park_the_entry_as_failed() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    h.backend.fail_all.store(true, Ordering::SeqCst);

    let events = h.processor.events();
    for _ in 0..MAX_ATTEMPTS {
        h.processor.drain().await;
        expire_backoff(&h.db);
    }

    // Exhausted: excluded from pending and from further drains
    assert_eq!(h.queue.count().unwrap(), 0);
    assert!(h.queue.list_pending().unwrap().is_empty());

    let status: String = h
        .db
        .lock()
        .unwrap()
        .connection()
        .query_row("SELECT status FROM sync_queue", [], |row| row.get(0))
        .unwrap();
    assert_eq!(status, "failed");

    // Terminal failure is surfaced exactly once
    let event = events.try_recv().unwrap();
    match event {
        SyncEvent::EntryFailed { entity_type, .. } => assert_eq!(entity_type, "session"),
    }
    assert!(events.try_recv().is_err());

    // Further drains ignore the parked entry
    h.backend.fail_all.store(false, Ordering::SeqCst);
    h.processor.drain().await;
    assert_eq!(h.backend.creates.load(Ordering::SeqCst), 0);

    // Operator clearing removes it
    assert_eq!(h.queue.clear_failed().unwrap(), 1);
}

#[tokio::test]
async fn backoff_blocks_immediate_retry() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    h.backend.fail_all.store(true, Ordering::SeqCst);

    h.processor.drain().await;
    h.backend.fail_all.store(false, Ordering::SeqCst);

    // Still inside the 5s backoff window: nothing is attempted
    h.processor.drain().await;
    assert_eq!(h.backend.creates.load(Ordering::SeqCst), 0);

    expire_backoff(&h.db);
    h.processor.drain().await;
    assert_eq!(h.backend.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn entry_for_locally_deleted_session_is_dropped() {
    let h = harness();
    let orphan = SyncPayload::Complete {
        session_uuid: Uuid::new_v4(),
        ended_at: Utc::now(),
    };
    h.queue
        .enqueue(
            orphan.op_type(),
            "session",
            &orphan.session_uuid().to_string(),
            &orphan,
        )
        .unwrap();

    h.processor.drain().await;

    assert_eq!(h.queue.count().unwrap(), 0);
    assert!(h.backend.finalizations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn remotely_deleted_entity_counts_as_synced() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    h.processor.drain().await;

    h.controller.update_personal_note(0, "grip slipped").unwrap();
    assert_eq!(h.queue.count().unwrap(), 1);

    // Server reports the entity gone; retrying forever would be useless
    h.backend.not_found.store(true, Ordering::SeqCst);
    h.processor.drain().await;

    assert_eq!(h.queue.count().unwrap(), 0);
    let entry_rows: i64 = h
        .db
        .lock()
        .unwrap()
        .connection()
        .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
        .unwrap();
    assert_eq!(entry_rows, 0);
}

#[tokio::test]
async fn malformed_payload_is_dropped_not_retried() {
    let h = harness();
    let payload = SyncPayload::Complete {
        session_uuid: Uuid::new_v4(),
        ended_at: Utc::now(),
    };
    h.queue
        .enqueue(payload.op_type(), "session", "x", &payload)
        .unwrap();
    h.db.lock()
        .unwrap()
        .connection()
        .execute("UPDATE sync_queue SET payload_json = '{broken'", [])
        .unwrap();

    h.processor.drain().await;
    assert_eq!(h.queue.count().unwrap(), 0);
}

#[tokio::test]
async fn finalization_reaches_the_backend() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    for i in 0..2 {
        let id = h.controller.active_session().unwrap().exercises[0].sets[i]
            .id
            .clone();
        h.controller
            .complete_set(0, &id, 140.0, 5, WeightUnit::Kg)
            .unwrap();
    }
    h.controller.end_workout().unwrap();

    h.processor.drain().await;

    let finalizations = h.backend.finalizations.lock().unwrap();
    assert_eq!(finalizations.len(), 1);
    assert_eq!(finalizations[0].1, SessionStatus::Completed);
}

#[tokio::test]
async fn note_update_addresses_exercise_by_order() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();
    h.controller.update_personal_note(0, "belt on").unwrap();

    h.processor.drain().await;

    let notes = h.backend.notes.lock().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].1, 0);
    assert_eq!(notes[0].2, "belt on");
}

#[tokio::test]
async fn background_drain_starts_and_stops() {
    let mut h = harness();
    h.controller.start_workout(&routine(), 1, 500).unwrap();

    h.processor
        .clone()
        .start_background(std::time::Duration::from_secs(60));
    // Idempotent: a second start is ignored
    h.processor
        .clone()
        .start_background(std::time::Duration::from_secs(60));

    // The immediate drain on start clears the queue
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(h.queue.count().unwrap(), 0);

    h.processor.stop_background();
}

#[test]
fn entry_status_transitions_are_recorded() {
    let h = harness();
    let payload = SyncPayload::Complete {
        session_uuid: Uuid::new_v4(),
        ended_at: Utc::now(),
    };
    let id = h
        .queue
        .enqueue(payload.op_type(), "session", "s", &payload)
        .unwrap();

    h.queue.mark_status(id, SyncStatus::Retrying, Some(2)).unwrap();
    let entry = h.queue.list_pending().unwrap().remove(0);
    assert_eq!(entry.status, SyncStatus::Retrying);
    assert_eq!(entry.attempts, 2);
    assert!(entry.last_attempt_at.is_some());
}
