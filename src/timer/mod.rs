//! Rest timer engine.
//!
//! Driven by set completions from the session controller; runs
//! independently of any rendering cadence.

pub mod rest_timer;
pub mod wake;

use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use rest_timer::{RestTimer, RestTimerEvent};
pub use wake::{NoopWakeLock, WakeLock, WakeLockError};

/// Tick cadence while a countdown is active.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Wall-clock source for the countdown anchor.
///
/// Injected so suspension gaps can be simulated in tests.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Spawn the recurring tick task for a shared timer.
///
/// Publishes the recomputed remaining seconds every 250ms while the
/// timer is active, and the completion event exactly once. The caller
/// owns the handle and aborts it on shutdown.
pub fn spawn_ticker(
    timer: Arc<Mutex<RestTimer>>,
    events: Sender<RestTimerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;

            let mut timer = timer.lock().unwrap();
            if !timer.is_active() {
                continue;
            }

            let seconds_left = timer.seconds_left();
            let completed = timer.tick();
            drop(timer);

            let _ = events.send(RestTimerEvent::Tick { seconds_left });
            if let Some(event) = completed {
                let _ = events.send(event);
            }
        }
    })
}
