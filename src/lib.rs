//! Repforge - Strength Training Session Core
//!
//! Local-first workout session tracking: a resumable session state
//! machine with set-by-set logging, a suspension-proof rest timer, and
//! a durable outbox that propagates mutations to a remote backend with
//! at-least-once retry semantics. Rendering, authentication, and the
//! exercise library are external collaborators.

pub mod audio;
pub mod session;
pub mod storage;
pub mod sync;
pub mod timer;

// Re-export commonly used types
pub use session::controller::SessionController;
pub use session::types::{RoutineSnapshot, WorkoutSession};
pub use storage::config::AppConfig;
pub use storage::database::Database;
pub use sync::processor::SyncProcessor;
pub use timer::rest_timer::RestTimer;
