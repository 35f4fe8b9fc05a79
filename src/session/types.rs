//! Workout session domain types.

use crate::storage::database::DatabaseError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fixed conversion factor for normalizing imperial weights.
pub const LBS_TO_KG: f64 = 0.453592;

/// Weight unit preference for a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    /// Kilograms
    #[default]
    Kg,
    /// Pounds
    Lbs,
}

impl WeightUnit {
    /// Normalize a weight in this unit to kilograms.
    pub fn to_kg(&self, weight: f64) -> f64 {
        match self {
            WeightUnit::Kg => weight,
            WeightUnit::Lbs => weight * LBS_TO_KG,
        }
    }
}

impl std::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightUnit::Kg => write!(f, "kg"),
            WeightUnit::Lbs => write!(f, "lbs"),
        }
    }
}

/// Lifecycle status of a workout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is currently being performed
    #[default]
    InProgress,
    /// Session was finished normally
    Completed,
    /// Session was discarded before finishing
    Abandoned,
}

impl SessionStatus {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    /// Parse the database column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One performed (or planned) set of an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    /// Locally-unique id: a UUID for planned sets, a timestamp-derived
    /// token for sets added mid-session
    pub id: String,
    /// Server-assigned id once synced
    pub remote_id: Option<i64>,
    /// 1-based position within the exercise, always dense
    pub set_number: u32,
    /// Planned reps
    pub target_reps: u32,
    /// Performed (or pre-filled) reps
    pub reps: u32,
    /// Planned weight
    pub target_weight: f64,
    /// Performed (or pre-filled) weight
    pub weight: f64,
    /// Weight unit
    pub unit: WeightUnit,
    /// Whether the set has been logged
    pub completed: bool,
    /// When the set was first logged
    pub completed_at: Option<DateTime<Utc>>,
    /// Optional free-text feedback ("felt heavy", etc.)
    pub feedback: Option<String>,
}

/// One exercise instance within a session.
///
/// Owned exclusively by its parent session; the display name is
/// denormalized so history survives exercise library edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExercise {
    /// Exercise library id
    pub exercise_id: i64,
    /// Server-assigned id once synced
    pub remote_id: Option<i64>,
    /// Display name (denormalized)
    pub name: String,
    /// Display order, fixed at session creation
    pub order: u32,
    /// Default rest duration after a completed set, in seconds
    pub rest_seconds: u32,
    /// Ordered list of sets
    pub sets: Vec<WorkoutSet>,
    /// Optional free-text personal note
    pub note: Option<String>,
}

impl SessionExercise {
    /// Whether any set in this exercise is still incomplete.
    pub fn has_incomplete_set(&self) -> bool {
        self.sets.iter().any(|s| !s.completed)
    }
}

/// The aggregate root of an active or historical workout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutSession {
    /// Local store id, assigned on first insert
    pub id: Option<i64>,
    /// Server-assigned id once synced
    pub remote_id: Option<i64>,
    /// Client-generated correlation key, stable across storage ids
    pub uuid: Uuid,
    /// Owning user
    pub user_id: i64,
    /// Routine this session was started from
    pub routine_id: i64,
    /// Routine display name (denormalized)
    pub routine_name: String,
    /// Calendar date of the session
    pub date: NaiveDate,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, set on completion or abandonment
    pub ended_at: Option<DateTime<Utc>>,
    /// Total duration in seconds, set on completion
    pub duration_seconds: Option<i64>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Ordered exercises, mirroring the routine; never reordered
    pub exercises: Vec<SessionExercise>,
    /// When the session was last reconciled with the remote store
    pub synced_at: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    /// Completed/total set counts across all exercises.
    pub fn progress(&self) -> Progress {
        let mut completed = 0u32;
        let mut total = 0u32;
        for exercise in &self.exercises {
            total += exercise.sets.len() as u32;
            completed += exercise.sets.iter().filter(|s| s.completed).count() as u32;
        }
        Progress {
            completed_sets: completed,
            total_sets: total,
        }
    }

    /// True when every set in every exercise has been completed.
    pub fn is_complete(&self) -> bool {
        self.exercises
            .iter()
            .all(|e| e.sets.iter().all(|s| s.completed))
    }

    /// Aggregate display stats over completed sets.
    ///
    /// Volume is normalized to kilograms regardless of the unit each set
    /// was logged in.
    pub fn completed_stats(&self) -> CompletedStats {
        let mut completed_sets = 0u32;
        let mut exercises_worked = 0u32;
        let mut total_volume_kg = 0.0f64;

        for exercise in &self.exercises {
            let mut any_completed = false;
            for set in &exercise.sets {
                if set.completed {
                    any_completed = true;
                    completed_sets += 1;
                    total_volume_kg += set.unit.to_kg(set.weight) * set.reps as f64;
                }
            }
            if any_completed {
                exercises_worked += 1;
            }
        }

        CompletedStats {
            duration_seconds: self.duration_seconds.unwrap_or(0),
            completed_sets,
            exercises_worked,
            total_volume_kg,
        }
    }
}

/// Completed/total set counts, recomputed on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Sets logged so far
    pub completed_sets: u32,
    /// All sets across all exercises
    pub total_sets: u32,
}

/// Aggregate stats computed when a session is ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedStats {
    /// Total session duration in seconds
    pub duration_seconds: i64,
    /// Number of completed sets
    pub completed_sets: u32,
    /// Number of exercises with at least one completed set
    pub exercises_worked: u32,
    /// Total volume lifted, normalized to kilograms
    pub total_volume_kg: f64,
}

/// Routine template input to session creation.
///
/// External collaborator data: the routine library owns these; session
/// creation only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineSnapshot {
    /// Routine id
    pub id: i64,
    /// Routine display name
    pub name: String,
    /// Exercises in display order
    pub exercises: Vec<RoutineExercise>,
}

/// One exercise entry in a routine template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineExercise {
    /// Exercise library id
    pub exercise_id: i64,
    /// Display name
    pub name: String,
    /// Planned number of sets
    pub target_sets: u32,
    /// Planned reps, as entered ("10", "8-12", "AMRAP")
    pub target_reps: String,
    /// Rest duration after each set, in seconds
    pub rest_seconds: u32,
}

/// Parse a routine's target-reps string to a concrete default.
///
/// Range strings like "8-12" take the lower bound; anything unparsable
/// falls back to 10.
pub fn parse_target_reps(target: &str) -> u32 {
    let trimmed = target.trim();
    if let Ok(reps) = trimmed.parse::<u32>() {
        return reps;
    }
    if let Some((low, _)) = trimmed.split_once('-') {
        if let Ok(reps) = low.trim().parse::<u32>() {
            return reps;
        }
    }
    10
}

/// Navigation sub-state persisted for session restore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavState {
    /// Which session screen the user was on
    pub view: SessionView,
    /// Exercise the user was looking at
    pub selected_exercise_index: usize,
}

/// Session screens the presentation layer can be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionView {
    /// Session overview (exercise list)
    #[default]
    Overview,
    /// Set-by-set logging for one exercise
    Logging,
}

/// Errors related to session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is currently active
    #[error("No active session")]
    NoActiveSession,

    /// The active session disappeared from the store
    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    /// Exercise index outside the session's exercise list
    #[error("Exercise index out of range: {0}")]
    ExerciseIndexOutOfRange(usize),

    /// Referenced set does not exist in the exercise
    #[error("Set not found: {0}")]
    SetNotFound(String),

    /// Durable storage failure; propagates to the caller for retry
    #[error("Database error: {0}")]
    Storage(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_reps_plain() {
        assert_eq!(parse_target_reps("10"), 10);
        assert_eq!(parse_target_reps(" 5 "), 5);
    }

    #[test]
    fn test_parse_target_reps_range_takes_lower_bound() {
        assert_eq!(parse_target_reps("8-12"), 8);
        assert_eq!(parse_target_reps("3 - 5"), 3);
    }

    #[test]
    fn test_parse_target_reps_unparsable_defaults_to_ten() {
        assert_eq!(parse_target_reps("AMRAP"), 10);
        assert_eq!(parse_target_reps(""), 10);
        assert_eq!(parse_target_reps("x-12"), 10);
    }

    #[test]
    fn test_weight_unit_to_kg() {
        assert_eq!(WeightUnit::Kg.to_kg(100.0), 100.0);
        assert!((WeightUnit::Lbs.to_kg(100.0) - 45.3592).abs() < 1e-9);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }
}
