//! Background sync processor.
//!
//! Drains the durable queue against the remote backend. One entry's
//! failure never aborts a drain pass, and a drain pass never runs
//! re-entrantly.

use crate::session::types::{SessionStatus, WorkoutSession};
use crate::storage::session_store::SessionStore;
use crate::sync::backend::{
    CreateSessionExercise, CreateSessionRequest, CreateSessionSet, RemoteBackend,
    RemoteSessionIds, SetUpdate,
};
use crate::sync::queue::{SyncQueue, MAX_ATTEMPTS};
use crate::sync::{BackendError, SyncError, SyncEvent, SyncPayload, SyncQueueEntry, SyncStatus};
use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of processing one queue entry.
enum Outcome {
    /// Remote confirmed; remove the entry.
    Success,
    /// Entry is undeliverable and should be removed without retrying.
    Drop(String),
    /// Transient failure; retry after backoff.
    Retry(SyncError),
}

/// Drains the sync queue against the remote backend.
pub struct SyncProcessor<B: RemoteBackend> {
    backend: B,
    queue: SyncQueue,
    store: SessionStore,
    /// Single-flight guard for drain passes.
    draining: AtomicBool,
    /// Terminal-failure notifications for the presentation layer.
    events: (Sender<SyncEvent>, Receiver<SyncEvent>),
    /// Background drain task, if running.
    background: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<B: RemoteBackend + 'static> SyncProcessor<B> {
    /// Create a new processor.
    pub fn new(backend: B, queue: SyncQueue, store: SessionStore) -> Self {
        Self {
            backend,
            queue,
            store,
            draining: AtomicBool::new(false),
            events: unbounded(),
            background: Mutex::new(None),
        }
    }

    /// Subscribe to sync events.
    pub fn events(&self) -> Receiver<SyncEvent> {
        self.events.1.clone()
    }

    /// Run one drain pass over all currently-eligible entries.
    ///
    /// Re-entrant calls return immediately; the in-flight pass covers
    /// them.
    pub async fn drain(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync drain already in progress, skipping");
            return;
        }

        self.drain_pass().await;
        self.draining.store(false, Ordering::SeqCst);
    }

    async fn drain_pass(&self) {
        let entries = match self.queue.list_pending() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read sync queue: {}", e);
                return;
            }
        };

        for entry in entries {
            if !SyncQueue::is_eligible(&entry, Utc::now()) {
                continue;
            }

            match self.process_entry(&entry).await {
                Outcome::Success => {
                    if let Err(e) = self.queue.remove(entry.id) {
                        tracing::warn!("Failed to remove synced entry {}: {}", entry.id, e);
                    }
                }
                Outcome::Drop(reason) => {
                    tracing::warn!("Dropping sync entry {}: {}", entry.id, reason);
                    if let Err(e) = self.queue.remove(entry.id) {
                        tracing::warn!("Failed to remove dropped entry {}: {}", entry.id, e);
                    }
                }
                Outcome::Retry(err) => {
                    let attempts = entry.attempts + 1;
                    let status = if attempts >= MAX_ATTEMPTS {
                        SyncStatus::Failed
                    } else {
                        SyncStatus::Retrying
                    };
                    tracing::debug!(
                        "Sync entry {} attempt {} failed: {}",
                        entry.id,
                        attempts,
                        err
                    );
                    if let Err(e) = self.queue.mark_status(entry.id, status, Some(attempts)) {
                        tracing::warn!("Failed to update entry {}: {}", entry.id, e);
                        continue;
                    }
                    if status == SyncStatus::Failed {
                        tracing::warn!(
                            "Sync entry {} for {} {} permanently failed: {}",
                            entry.id,
                            entry.entity_type,
                            entry.entity_id,
                            err
                        );
                        let _ = self.events.0.send(SyncEvent::EntryFailed {
                            entry_id: entry.id,
                            entity_type: entry.entity_type.clone(),
                            entity_id: entry.entity_id.clone(),
                        });
                    }
                }
            }
        }
    }

    async fn process_entry(&self, entry: &SyncQueueEntry) -> Outcome {
        let payload = match entry.payload() {
            Ok(payload) => payload,
            Err(e) => return Outcome::Drop(e.to_string()),
        };

        // The user may have cleared local data since the op was queued.
        let session = match self.store.get_by_uuid(&payload.session_uuid()) {
            Ok(Some(session)) => session,
            Ok(None) => return Outcome::Drop("session no longer exists locally".to_string()),
            Err(e) => return Outcome::Retry(e.into()),
        };

        match payload {
            SyncPayload::Create {
                session: snapshot,
                remote_user_id,
            } => {
                let request = build_create_request(&snapshot, remote_user_id);
                match self.backend.create_session(&request).await {
                    Ok(ids) => self.apply_remote_ids(session, ids),
                    Err(e) => Outcome::Retry(e.into()),
                }
            }
            SyncPayload::SetComplete {
                set_id,
                exercise_order,
                reps,
                weight,
                completed_at,
                ..
            } => {
                let Some(exercise) = session
                    .exercises
                    .iter()
                    .find(|e| e.order == exercise_order)
                else {
                    return Outcome::Drop("exercise no longer exists locally".to_string());
                };
                let Some(set) = exercise.sets.iter().find(|s| s.id == set_id) else {
                    return Outcome::Drop("set no longer exists locally".to_string());
                };
                let Some(remote_set_id) = set.remote_id else {
                    return Outcome::Retry(SyncError::MissingRemoteId(format!("set {set_id}")));
                };

                let update = SetUpdate {
                    reps: Some(reps),
                    weight: Some(weight),
                    completed: Some(true),
                    completed_at: Some(completed_at),
                };
                self.finish_update(self.backend.update_set(remote_set_id, &update).await)
            }
            SyncPayload::AddSet {
                exercise_order,
                set_number,
                unit,
                ..
            } => {
                let Some(exercise) = session
                    .exercises
                    .iter()
                    .find(|e| e.order == exercise_order)
                else {
                    return Outcome::Drop("exercise no longer exists locally".to_string());
                };
                let Some(remote_exercise_id) = exercise.remote_id else {
                    return Outcome::Retry(SyncError::MissingRemoteId(format!(
                        "exercise order {exercise_order}"
                    )));
                };

                match self
                    .backend
                    .add_set(remote_exercise_id, set_number, unit)
                    .await
                {
                    Ok(remote_set_id) => {
                        self.record_set_remote_id(session, exercise_order, set_number, remote_set_id)
                    }
                    Err(BackendError::NotFound) => {
                        Outcome::Drop("exercise already deleted remotely".to_string())
                    }
                    Err(e) => Outcome::Retry(e.into()),
                }
            }
            SyncPayload::ExerciseNote {
                exercise_order,
                note,
                ..
            } => {
                let Some(remote_session_id) = session.remote_id else {
                    return Outcome::Retry(SyncError::MissingRemoteId(format!(
                        "session {}",
                        session.uuid
                    )));
                };
                self.finish_update(
                    self.backend
                        .update_exercise_note(remote_session_id, exercise_order, &note)
                        .await,
                )
            }
            SyncPayload::Complete { ended_at, .. } => {
                self.finalize(&session, ended_at, SessionStatus::Completed)
                    .await
            }
            SyncPayload::Abandon { ended_at, .. } => {
                self.finalize(&session, ended_at, SessionStatus::Abandoned)
                    .await
            }
        }
    }

    async fn finalize(
        &self,
        session: &WorkoutSession,
        ended_at: chrono::DateTime<Utc>,
        status: SessionStatus,
    ) -> Outcome {
        let Some(remote_session_id) = session.remote_id else {
            return Outcome::Retry(SyncError::MissingRemoteId(format!(
                "session {}",
                session.uuid
            )));
        };
        self.finish_update(
            self.backend
                .finalize_session(remote_session_id, ended_at, status)
                .await,
        )
    }

    /// Common success/not-found/error mapping for plain update calls.
    ///
    /// "Not found" means the entity is already gone remotely; retrying
    /// forever would never succeed, so it counts as done.
    fn finish_update(&self, result: Result<(), BackendError>) -> Outcome {
        match result {
            Ok(()) => Outcome::Success,
            Err(BackendError::NotFound) => {
                Outcome::Drop("entity already deleted remotely".to_string())
            }
            Err(e) => Outcome::Retry(e.into()),
        }
    }

    /// Write server-assigned ids from session creation back into the
    /// local record.
    fn apply_remote_ids(&self, mut session: WorkoutSession, ids: RemoteSessionIds) -> Outcome {
        session.remote_id = Some(ids.session_id);
        for remote_exercise in &ids.exercises {
            let Some(exercise) = session
                .exercises
                .iter_mut()
                .find(|e| e.order == remote_exercise.order)
            else {
                continue;
            };
            exercise.remote_id = Some(remote_exercise.exercise_id);
            for remote_set in &remote_exercise.sets {
                if let Some(set) = exercise
                    .sets
                    .iter_mut()
                    .find(|s| s.set_number == remote_set.set_number)
                {
                    set.remote_id = Some(remote_set.set_id);
                }
            }
        }
        session.synced_at = Some(Utc::now());

        match self.store.update_session(&session) {
            Ok(()) => {
                tracing::info!("Session {} synced as remote {}", session.uuid, ids.session_id);
                Outcome::Success
            }
            Err(e) => Outcome::Retry(e.into()),
        }
    }

    /// Write a server-assigned set id from an add-set call back into the
    /// local record.
    fn record_set_remote_id(
        &self,
        mut session: WorkoutSession,
        exercise_order: u32,
        set_number: u32,
        remote_set_id: i64,
    ) -> Outcome {
        if let Some(set) = session
            .exercises
            .iter_mut()
            .find(|e| e.order == exercise_order)
            .and_then(|e| e.sets.iter_mut().find(|s| s.set_number == set_number))
        {
            set.remote_id = Some(remote_set_id);
            if let Err(e) = self.store.update_session(&session) {
                return Outcome::Retry(e.into());
            }
        }
        // The set may have been removed locally in the meantime; the
        // remote copy stays, which is acceptable drift.
        Outcome::Success
    }
}

impl<B: RemoteBackend + 'static> SyncProcessor<B> {
    /// Start the recurring background drain.
    ///
    /// Fires one immediate drain, then one per interval. Idempotent: a
    /// second call while running is ignored. The task holds only a weak
    /// reference, so it winds down with the processor.
    pub fn start_background(self: Arc<Self>, interval: Duration) {
        let mut guard = self.background.lock().unwrap();
        if guard.is_some() {
            tracing::debug!("Background sync already running");
            return;
        }

        let processor = Arc::downgrade(&self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(processor) = processor.upgrade() else {
                    break;
                };
                processor.drain().await;
            }
        }));
        tracing::info!("Background sync started (every {:?})", interval);
    }

    /// Cancel the background drain task.
    pub fn stop_background(&self) {
        if let Some(handle) = self.background.lock().unwrap().take() {
            handle.abort();
            tracing::info!("Background sync stopped");
        }
    }
}

impl<B: RemoteBackend> Drop for SyncProcessor<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.background.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn build_create_request(session: &WorkoutSession, remote_user_id: i64) -> CreateSessionRequest {
    CreateSessionRequest {
        user_id: remote_user_id,
        client_uuid: session.uuid.to_string(),
        routine_id: session.routine_id,
        routine_name: session.routine_name.clone(),
        date: session.date,
        started_at: session.started_at,
        exercises: session
            .exercises
            .iter()
            .map(|exercise| CreateSessionExercise {
                exercise_id: exercise.exercise_id,
                name: exercise.name.clone(),
                order: exercise.order,
                sets: exercise
                    .sets
                    .iter()
                    .map(|set| CreateSessionSet {
                        set_number: set.set_number,
                        target_reps: set.target_reps,
                        unit: set.unit,
                    })
                    .collect(),
            })
            .collect(),
    }
}
