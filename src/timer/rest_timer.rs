//! Rest period countdown engine.
//!
//! The source of truth is an absolute end timestamp captured once at
//! activation, never a decrementing counter. Remaining time is
//! recomputed from the clock on every read, so the countdown
//! self-corrects after the host process has been suspended for any
//! length of time (screen lock, backgrounding).

use crate::audio::cues::{CuePattern, ToneGenerator};
use crate::timer::wake::{NoopWakeLock, WakeLock};
use crate::timer::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Events produced by the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestTimerEvent {
    /// Published remaining seconds while active
    Tick { seconds_left: u32 },
    /// The countdown reached zero naturally (not skipped)
    Completed,
}

enum TimerState {
    Idle,
    Active { ends_at: DateTime<Utc> },
}

/// Timestamp-anchored rest countdown.
pub struct RestTimer {
    clock: Arc<dyn Clock>,
    state: TimerState,
    minimized: bool,
    wake_lock: Box<dyn WakeLock>,
    cues: Option<ToneGenerator>,
}

impl RestTimer {
    /// Create an idle timer over the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: TimerState::Idle,
            minimized: false,
            wake_lock: Box::new(NoopWakeLock),
            cues: None,
        }
    }

    /// Use a platform wake lock while the timer is active.
    pub fn with_wake_lock(mut self, wake_lock: Box<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    /// Play an audible cue on natural completion.
    pub fn with_cues(mut self, cues: ToneGenerator) -> Self {
        self.cues = Some(cues);
        self
    }

    /// Start (or restart) the countdown for the given duration.
    ///
    /// Anchors the end timestamp once; everything after derives from it.
    pub fn start(&mut self, duration_seconds: u32) {
        let ends_at = self.clock.now() + Duration::seconds(duration_seconds as i64);
        self.state = TimerState::Active { ends_at };
        self.minimized = false;

        if let Err(e) = self.wake_lock.acquire() {
            // Cosmetic degradation only; the countdown stays correct.
            tracing::debug!("Wake lock not acquired: {}", e);
        }

        tracing::debug!("Rest timer started for {}s", duration_seconds);
    }

    /// Remaining whole seconds, recomputed from the clock.
    pub fn seconds_left(&self) -> u32 {
        match &self.state {
            TimerState::Idle => 0,
            TimerState::Active { ends_at } => {
                let remaining_ms = (*ends_at - self.clock.now()).num_milliseconds();
                if remaining_ms <= 0 {
                    0
                } else {
                    ((remaining_ms as f64) / 1000.0).round() as u32
                }
            }
        }
    }

    /// Advance the state machine; returns `Completed` exactly once when
    /// the countdown expires naturally.
    pub fn tick(&mut self) -> Option<RestTimerEvent> {
        match &self.state {
            TimerState::Active { .. } if self.seconds_left() == 0 => {
                self.state = TimerState::Idle;
                self.wake_lock.release();
                if let Some(cues) = &self.cues {
                    cues.play_pattern_detached(CuePattern::DoubleBeep);
                }
                tracing::debug!("Rest timer completed");
                Some(RestTimerEvent::Completed)
            }
            _ => None,
        }
    }

    /// Recompute immediately after the host becomes foreground-visible
    /// again, instead of waiting for the next tick.
    pub fn resync(&mut self) -> Option<RestTimerEvent> {
        self.tick()
    }

    /// Discard the remaining time and go idle. No completion cue.
    pub fn skip(&mut self) {
        if matches!(self.state, TimerState::Active { .. }) {
            self.state = TimerState::Idle;
            self.wake_lock.release();
            tracing::debug!("Rest timer skipped");
        }
    }

    /// Shift the end timestamp by `delta_seconds` (for +10s/-10s
    /// controls). The anchor stays authoritative, so repeated
    /// adjustments cannot drift. Clamped so the end never moves before
    /// now.
    pub fn adjust(&mut self, delta_seconds: i64) {
        if let TimerState::Active { ends_at } = &mut self.state {
            let now = self.clock.now();
            let shifted = *ends_at + Duration::seconds(delta_seconds);
            *ends_at = if shifted < now { now } else { shifted };
        }
    }

    /// Collapse the presentation to its minimized form. Countdown is
    /// unaffected.
    pub fn minimize(&mut self) {
        self.minimized = true;
    }

    /// Restore the full presentation. Countdown is unaffected.
    pub fn restore(&mut self) {
        self.minimized = false;
    }

    /// Whether a countdown is running.
    pub fn is_active(&self) -> bool {
        matches!(self.state, TimerState::Active { .. })
    }

    /// Whether the presentation is minimized.
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }
}
