//! Workout session state machine.
//!
//! Owns the active session aggregate and is its sole mutator. Durable
//! storage is the source of truth: every mutating operation re-reads
//! the session, applies the change, writes it back, and only then
//! refreshes the in-memory mirror from the written state. Interleaved
//! calls on the event loop therefore always see the latest persisted
//! state instead of a stale captured copy.
//!
//! Sync intent is recorded separately after the session write. A crash
//! between the two writes loses only the intent, never the user's data;
//! there is no reconciliation pass for a lost intent.

use crate::session::types::{
    parse_target_reps, CompletedStats, NavState, Progress, RoutineSnapshot, SessionError,
    SessionExercise, SessionStatus, SessionView, WeightUnit, WorkoutSession, WorkoutSet,
};
use crate::storage::session_store::SessionStore;
use crate::sync::queue::SyncQueue;
use crate::sync::SyncPayload;
use crate::timer::RestTimer;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-progress sessions idle longer than this are auto-abandoned at
/// bootstrap instead of being restored.
const STALE_SESSION_HOURS: i64 = 2;

/// How many completed sessions to scan for "last performance" seeding.
/// Bounded on purpose; perfect recall is not worth unbounded reads.
const RECENT_HISTORY_LIMIT: u32 = 15;

/// Routine-rotation collaborator: advances the user's suggested-routine
/// pointer when a session completes (never when it is abandoned).
pub trait RoutineRotation: Send + Sync {
    /// Record that the user completed this routine.
    fn advance(&self, user_id: i64, completed_routine_id: i64);
}

/// No-op rotation for embeddings that handle suggestion elsewhere.
#[derive(Debug, Default)]
pub struct NoopRotation;

impl RoutineRotation for NoopRotation {
    fn advance(&self, _user_id: i64, _completed_routine_id: i64) {}
}

/// The active-session state machine.
pub struct SessionController {
    store: SessionStore,
    queue: SyncQueue,
    timer: Arc<Mutex<RestTimer>>,
    rotation: Arc<dyn RoutineRotation>,
    default_unit: WeightUnit,
    /// In-memory mirror of the persisted session.
    active: Option<WorkoutSession>,
    /// Presentation sub-state, persisted so recovery can restore it.
    nav: NavState,
}

impl SessionController {
    /// Create a controller with no active session. Call
    /// [`bootstrap`](Self::bootstrap) once afterwards to recover any
    /// persisted in-progress session.
    pub fn new(
        store: SessionStore,
        queue: SyncQueue,
        timer: Arc<Mutex<RestTimer>>,
        rotation: Arc<dyn RoutineRotation>,
        default_unit: WeightUnit,
    ) -> Self {
        Self {
            store,
            queue,
            timer,
            rotation,
            default_unit,
            active: None,
            nav: NavState::default(),
        }
    }

    // ========== Lifecycle Operations ==========

    /// Start a new session from a routine.
    ///
    /// Any existing in-progress session for the user is force-deleted
    /// first (one in-progress session per user, by design). Set defaults
    /// are seeded from the most recent matching historical sets, falling
    /// back to the routine's targets.
    pub fn start_workout(
        &mut self,
        routine: &RoutineSnapshot,
        user_id: i64,
        remote_user_id: i64,
    ) -> Result<WorkoutSession, SessionError> {
        // One in-progress session per user: the old one is deleted, not
        // abandoned. Losing its logged sets is accepted data loss.
        if let Some(existing) = self.store.find_in_progress(user_id)? {
            tracing::info!(
                "Replacing in-progress session {} with a new one",
                existing.uuid
            );
            if let Some(id) = existing.id {
                self.store.delete_session(id)?;
            }
        }

        let history = self.store.recent_completed(user_id, RECENT_HISTORY_LIMIT)?;

        let started_at = Utc::now();
        let exercises = routine
            .exercises
            .iter()
            .enumerate()
            .map(|(order, routine_exercise)| {
                self.build_exercise(routine_exercise, order as u32, &history)
            })
            .collect();

        let mut session = WorkoutSession {
            id: None,
            remote_id: None,
            uuid: Uuid::new_v4(),
            user_id,
            routine_id: routine.id,
            routine_name: routine.name.clone(),
            date: started_at.date_naive(),
            started_at,
            ended_at: None,
            duration_seconds: None,
            status: SessionStatus::InProgress,
            exercises,
            synced_at: None,
        };

        self.store.insert_session(&mut session)?;
        tracing::info!(
            "Started session {} from routine '{}'",
            session.uuid,
            routine.name
        );

        self.enqueue(SyncPayload::Create {
            session: Box::new(session.clone()),
            remote_user_id,
        });

        self.nav = NavState::default();
        self.persist_nav();
        self.active = Some(session.clone());
        Ok(session)
    }

    /// Log a set: record weight/reps, carry the values forward onto
    /// later incomplete sets, and arm the rest timer on first-time
    /// completion. Re-completing an already-completed set re-edits it
    /// in place without touching the timer.
    pub fn complete_set(
        &mut self,
        exercise_index: usize,
        set_id: &str,
        weight: f64,
        reps: u32,
        unit: WeightUnit,
    ) -> Result<(), SessionError> {
        // Re-read: rapid successive completions must not apply against a
        // stale snapshot of each other.
        let mut session = self.reload_active()?;

        let exercise = session
            .exercises
            .get_mut(exercise_index)
            .ok_or(SessionError::ExerciseIndexOutOfRange(exercise_index))?;
        let exercise_order = exercise.order;
        let rest_seconds = exercise.rest_seconds;

        let set_index = exercise
            .sets
            .iter()
            .position(|s| s.id == set_id)
            .ok_or_else(|| SessionError::SetNotFound(set_id.to_string()))?;

        let was_completed = exercise.sets[set_index].completed;
        let set_number = exercise.sets[set_index].set_number;
        // Re-edits keep the original completion time.
        let completed_at = exercise.sets[set_index]
            .completed_at
            .unwrap_or_else(Utc::now);

        {
            let set = &mut exercise.sets[set_index];
            set.weight = weight;
            set.reps = reps;
            set.unit = unit;
            set.completed = true;
            set.completed_at = Some(completed_at);
        }

        // Carry forward: pre-fill later incomplete sets with what the
        // user just lifted. Always overwritable by their own completion.
        for set in exercise
            .sets
            .iter_mut()
            .filter(|s| !s.completed && s.set_number > set_number)
        {
            set.weight = weight;
            set.reps = reps;
            set.unit = unit;
        }

        self.store.update_session(&session)?;
        let session_uuid = session.uuid;
        self.active = Some(session);

        if !was_completed {
            let mut timer = self.timer.lock().unwrap();
            timer.start(rest_seconds);
        }

        self.enqueue(SyncPayload::SetComplete {
            session_uuid,
            set_id: set_id.to_string(),
            exercise_order,
            set_number,
            reps,
            weight,
            unit,
            completed_at,
        });
        Ok(())
    }

    /// Append an extra set to an exercise, cloning the last set's values
    /// as defaults.
    pub fn add_extra_set(&mut self, exercise_index: usize) -> Result<(), SessionError> {
        let mut session = self.reload_active()?;

        let exercise = session
            .exercises
            .get_mut(exercise_index)
            .ok_or(SessionError::ExerciseIndexOutOfRange(exercise_index))?;
        let exercise_order = exercise.order;

        let (reps, weight, unit) = match exercise.sets.last() {
            Some(last) => (last.reps, last.weight, last.unit),
            None => (10, 0.0, self.default_unit),
        };
        let set_number = exercise.sets.len() as u32 + 1;

        exercise.sets.push(WorkoutSet {
            // Timestamp-derived token; planned sets use UUIDs.
            id: format!("{}-{}", Utc::now().timestamp_millis(), set_number),
            remote_id: None,
            set_number,
            target_reps: reps,
            reps,
            target_weight: weight,
            weight,
            unit,
            completed: false,
            completed_at: None,
            feedback: None,
        });

        self.store.update_session(&session)?;
        let session_uuid = session.uuid;
        self.active = Some(session);

        self.enqueue(SyncPayload::AddSet {
            session_uuid,
            exercise_order,
            set_number,
            unit,
        });
        Ok(())
    }

    /// Remove the last set of an exercise. No-op unless the tail set
    /// exists and is still uncompleted; completed work is never
    /// discarded.
    pub fn remove_extra_set(&mut self, exercise_index: usize) -> Result<(), SessionError> {
        let mut session = self.reload_active()?;

        let exercise = session
            .exercises
            .get_mut(exercise_index)
            .ok_or(SessionError::ExerciseIndexOutOfRange(exercise_index))?;

        match exercise.sets.last() {
            None => return Ok(()),
            Some(last) if last.completed => return Ok(()),
            Some(_) => {
                exercise.sets.pop();
            }
        }

        self.store.update_session(&session)?;
        self.active = Some(session);
        Ok(())
    }

    /// Overwrite the personal note on an exercise.
    pub fn update_personal_note(
        &mut self,
        exercise_index: usize,
        note: &str,
    ) -> Result<(), SessionError> {
        let mut session = self.reload_active()?;

        let exercise = session
            .exercises
            .get_mut(exercise_index)
            .ok_or(SessionError::ExerciseIndexOutOfRange(exercise_index))?;
        let exercise_order = exercise.order;
        exercise.note = Some(note.to_string());

        self.store.update_session(&session)?;
        let session_uuid = session.uuid;
        self.active = Some(session);

        self.enqueue(SyncPayload::ExerciseNote {
            session_uuid,
            exercise_order,
            note: note.to_string(),
        });
        Ok(())
    }

    /// Finish the session: compute duration and aggregate stats, mark it
    /// completed, advance routine rotation, and clear the active state.
    pub fn end_workout(&mut self) -> Result<CompletedStats, SessionError> {
        let mut session = self.reload_active()?;

        let ended_at = Utc::now();
        session.ended_at = Some(ended_at);
        session.duration_seconds = Some((ended_at - session.started_at).num_seconds());
        session.status = SessionStatus::Completed;
        self.store.update_session(&session)?;

        let stats = session.completed_stats();
        tracing::info!(
            "Completed session {}: {} sets, {:.1} kg volume",
            session.uuid,
            stats.completed_sets,
            stats.total_volume_kg
        );

        self.rotation.advance(session.user_id, session.routine_id);
        self.enqueue(SyncPayload::Complete {
            session_uuid: session.uuid,
            ended_at,
        });

        self.clear_active();
        Ok(stats)
    }

    /// Discard the session: mark it abandoned and clear the active
    /// state. No stats, no routine rotation.
    pub fn abandon_workout(&mut self) -> Result<(), SessionError> {
        let mut session = self.reload_active()?;

        let ended_at = Utc::now();
        session.ended_at = Some(ended_at);
        session.status = SessionStatus::Abandoned;
        self.store.update_session(&session)?;

        tracing::info!("Abandoned session {}", session.uuid);
        self.enqueue(SyncPayload::Abandon {
            session_uuid: session.uuid,
            ended_at,
        });

        self.clear_active();
        Ok(())
    }

    /// Recover state at process start. Call exactly once.
    ///
    /// An in-progress session idle for more than two hours is
    /// auto-abandoned rather than restored; forgotten sessions must not
    /// carry over indefinitely. Otherwise the session becomes active
    /// again, the persisted view is restored (corrupted state falls
    /// back to defaults), and the selected exercise is recomputed as
    /// the first one with work left.
    pub fn bootstrap(&mut self, user_id: i64) -> Result<(), SessionError> {
        let Some(mut session) = self.store.find_in_progress(user_id)? else {
            return Ok(());
        };

        let now = Utc::now();
        if now - session.started_at > Duration::hours(STALE_SESSION_HOURS) {
            session.ended_at = Some(now);
            session.status = SessionStatus::Abandoned;
            self.store.update_session(&session)?;
            tracing::info!(
                "Auto-abandoned stale session {} (started {})",
                session.uuid,
                session.started_at
            );
            self.enqueue(SyncPayload::Abandon {
                session_uuid: session.uuid,
                ended_at: now,
            });
            return Ok(());
        }

        let mut nav = self.store.load_nav_state().unwrap_or_default();
        nav.selected_exercise_index = session
            .exercises
            .iter()
            .position(|e| e.has_incomplete_set())
            .unwrap_or(0);
        self.nav = nav;

        tracing::info!("Restored in-progress session {}", session.uuid);
        self.active = Some(session);
        Ok(())
    }

    // ========== Read-Only State ==========

    /// The active session, if any.
    pub fn active_session(&self) -> Option<&WorkoutSession> {
        self.active.as_ref()
    }

    /// Completed/total set counts, recomputed on every access.
    pub fn progress(&self) -> Progress {
        self.active.as_ref().map(|s| s.progress()).unwrap_or(Progress {
            completed_sets: 0,
            total_sets: 0,
        })
    }

    /// Whether every set in the active session is completed.
    pub fn is_workout_complete(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.is_complete())
    }

    // ========== Rest Timer Delegation ==========

    /// Skip the current rest period. Immediate and unconditional.
    pub fn skip_rest(&self) {
        self.timer.lock().unwrap().skip();
    }

    /// Shift the current rest period by the given seconds.
    pub fn adjust_rest(&self, delta_seconds: i64) {
        self.timer.lock().unwrap().adjust(delta_seconds);
    }

    /// Whether a rest countdown is running.
    pub fn is_rest_active(&self) -> bool {
        self.timer.lock().unwrap().is_active()
    }

    /// Remaining rest seconds.
    pub fn rest_seconds_left(&self) -> u32 {
        self.timer.lock().unwrap().seconds_left()
    }

    /// Whether the rest presentation is minimized.
    pub fn is_rest_minimized(&self) -> bool {
        self.timer.lock().unwrap().is_minimized()
    }

    /// Minimize the rest presentation.
    pub fn minimize_rest(&self) {
        self.timer.lock().unwrap().minimize();
    }

    /// Restore the rest presentation.
    pub fn restore_rest(&self) {
        self.timer.lock().unwrap().restore();
    }

    // ========== Navigation Sub-State ==========

    /// Current session view.
    pub fn view(&self) -> SessionView {
        self.nav.view
    }

    /// Currently selected exercise index.
    pub fn selected_exercise_index(&self) -> usize {
        self.nav.selected_exercise_index
    }

    /// Switch the session view.
    pub fn set_view(&mut self, view: SessionView) {
        self.nav.view = view;
        self.persist_nav();
    }

    /// Select an exercise.
    pub fn select_exercise(&mut self, index: usize) {
        self.nav.selected_exercise_index = index;
        self.persist_nav();
    }

    // ========== Internals ==========

    fn build_exercise(
        &self,
        routine_exercise: &crate::session::types::RoutineExercise,
        order: u32,
        history: &[WorkoutSession],
    ) -> SessionExercise {
        // Most recent historical appearance of this exercise, if any.
        let last_performance = history.iter().find_map(|session| {
            session
                .exercises
                .iter()
                .find(|e| e.exercise_id == routine_exercise.exercise_id)
        });

        let target_reps = parse_target_reps(&routine_exercise.target_reps);
        let sets = (1..=routine_exercise.target_sets)
            .map(|set_number| {
                let historical = last_performance
                    .and_then(|e| e.sets.iter().find(|s| s.set_number == set_number));

                let reps = historical.map(|s| s.reps).unwrap_or(target_reps);
                let weight = historical.map(|s| s.weight).unwrap_or(0.0);
                let unit = historical.map(|s| s.unit).unwrap_or(self.default_unit);

                WorkoutSet {
                    id: Uuid::new_v4().to_string(),
                    remote_id: None,
                    set_number,
                    target_reps: reps,
                    reps,
                    target_weight: weight,
                    weight,
                    unit,
                    completed: false,
                    completed_at: None,
                    feedback: None,
                }
            })
            .collect();

        SessionExercise {
            exercise_id: routine_exercise.exercise_id,
            remote_id: None,
            name: routine_exercise.name.clone(),
            order,
            rest_seconds: routine_exercise.rest_seconds,
            sets,
            note: None,
        }
    }

    /// Re-read the active session from durable storage.
    fn reload_active(&self) -> Result<WorkoutSession, SessionError> {
        let id = self
            .active
            .as_ref()
            .and_then(|s| s.id)
            .ok_or(SessionError::NoActiveSession)?;
        self.store
            .get_session(id)?
            .ok_or(SessionError::SessionNotFound(id))
    }

    /// Record a sync intent. Fire-and-forget: the session write already
    /// committed, so a failed queue write must not surface as a failed
    /// action.
    fn enqueue(&self, payload: SyncPayload) {
        let entity_id = payload.session_uuid().to_string();
        if let Err(e) = self
            .queue
            .enqueue(payload.op_type(), "session", &entity_id, &payload)
        {
            tracing::warn!("Failed to enqueue sync op for {}: {}", entity_id, e);
        }
    }

    fn clear_active(&mut self) {
        self.active = None;
        self.timer.lock().unwrap().skip();
        self.nav = NavState::default();
        if let Err(e) = self.store.clear_nav_state() {
            tracing::warn!("Failed to clear nav state: {}", e);
        }
    }

    fn persist_nav(&self) {
        if let Err(e) = self.store.save_nav_state(&self.nav) {
            tracing::warn!("Failed to persist nav state: {}", e);
        }
    }
}
