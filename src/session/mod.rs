//! Workout session state machine and domain model.

pub mod controller;
pub mod types;

pub use controller::{NoopRotation, RoutineRotation, SessionController};
pub use types::{
    parse_target_reps, CompletedStats, NavState, Progress, RoutineExercise, RoutineSnapshot,
    SessionError, SessionExercise, SessionStatus, SessionView, WeightUnit, WorkoutSession,
    WorkoutSet,
};
