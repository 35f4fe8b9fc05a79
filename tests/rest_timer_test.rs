//! Integration tests for the rest timer engine.

use chrono::{DateTime, Duration, Utc};
use repforge::session::controller::{NoopRotation, SessionController};
use repforge::session::types::{RoutineExercise, RoutineSnapshot, WeightUnit};
use repforge::storage::database::Database;
use repforge::storage::session_store::SessionStore;
use repforge::sync::queue::SyncQueue;
use repforge::timer::{spawn_ticker, Clock, RestTimer, RestTimerEvent, SystemClock};
use std::sync::{Arc, Mutex};

/// Settable clock for simulating host suspension.
struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    fn advance(&self, seconds: i64) {
        *self.now.lock().unwrap() += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[test]
fn countdown_survives_a_suspension_gap() {
    let clock = Arc::new(ManualClock::new());
    let mut timer = RestTimer::new(clock.clone());

    timer.start(90);

    // Screen locked for 30 seconds: no ticks were delivered. The
    // visibility-change resync recomputes from the anchor immediately.
    clock.advance(30);
    assert_eq!(timer.resync(), None);
    assert_eq!(timer.seconds_left(), 60);
}

#[test]
fn suspension_past_expiry_completes_immediately_on_resync() {
    let clock = Arc::new(ManualClock::new());
    let mut timer = RestTimer::new(clock.clone());

    timer.start(45);
    clock.advance(600);

    assert_eq!(timer.resync(), Some(RestTimerEvent::Completed));
    assert!(!timer.is_active());
}

#[test]
fn adjustments_never_accumulate_drift() {
    let clock = Arc::new(ManualClock::new());
    let mut timer = RestTimer::new(clock.clone());

    timer.start(60);
    for _ in 0..6 {
        timer.adjust(10);
        timer.adjust(-10);
    }
    clock.advance(20);
    assert_eq!(timer.seconds_left(), 40);
}

fn single_exercise_routine(rest_seconds: u32) -> RoutineSnapshot {
    RoutineSnapshot {
        id: 1,
        name: "Test".to_string(),
        exercises: vec![RoutineExercise {
            exercise_id: 1,
            name: "Row".to_string(),
            target_sets: 2,
            target_reps: "10".to_string(),
            rest_seconds,
        }],
    }
}

fn controller_with_timer(timer: Arc<Mutex<RestTimer>>) -> SessionController {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let store = SessionStore::new(db.clone());
    let queue = SyncQueue::new(db);
    SessionController::new(store, queue, timer, Arc::new(NoopRotation), WeightUnit::Kg)
}

#[test]
fn first_time_completion_arms_the_timer_with_exercise_rest() {
    let timer = Arc::new(Mutex::new(RestTimer::new(Arc::new(SystemClock))));
    let mut controller = controller_with_timer(timer);
    controller
        .start_workout(&single_exercise_routine(120), 1, 1)
        .unwrap();
    assert!(!controller.is_rest_active());

    let set_id = controller.active_session().unwrap().exercises[0].sets[0]
        .id
        .clone();
    controller
        .complete_set(0, &set_id, 60.0, 10, WeightUnit::Kg)
        .unwrap();

    assert!(controller.is_rest_active());
    assert!(!controller.is_rest_minimized());
    let left = controller.rest_seconds_left();
    assert!((118..=120).contains(&left), "expected ~120s, got {left}");
}

#[test]
fn skip_rest_is_immediate() {
    let timer = Arc::new(Mutex::new(RestTimer::new(Arc::new(SystemClock))));
    let mut controller = controller_with_timer(timer);
    controller
        .start_workout(&single_exercise_routine(120), 1, 1)
        .unwrap();

    let set_id = controller.active_session().unwrap().exercises[0].sets[0]
        .id
        .clone();
    controller
        .complete_set(0, &set_id, 60.0, 10, WeightUnit::Kg)
        .unwrap();
    assert!(controller.is_rest_active());

    controller.skip_rest();
    assert!(!controller.is_rest_active());
    assert_eq!(controller.rest_seconds_left(), 0);
}

#[test]
fn ending_the_workout_cancels_the_rest_timer() {
    let timer = Arc::new(Mutex::new(RestTimer::new(Arc::new(SystemClock))));
    let mut controller = controller_with_timer(timer);
    controller
        .start_workout(&single_exercise_routine(120), 1, 1)
        .unwrap();

    for i in 0..2 {
        let id = controller.active_session().unwrap().exercises[0].sets[i]
            .id
            .clone();
        controller
            .complete_set(0, &id, 60.0, 10, WeightUnit::Kg)
            .unwrap();
    }
    assert!(controller.is_rest_active());

    controller.end_workout().unwrap();
    assert!(!controller.is_rest_active());
}

#[tokio::test]
async fn ticker_publishes_remaining_and_completion() {
    let clock = Arc::new(ManualClock::new());
    let timer = Arc::new(Mutex::new(RestTimer::new(clock.clone())));
    let (sender, receiver) = crossbeam::channel::unbounded();

    let handle = spawn_ticker(timer.clone(), sender);

    timer.lock().unwrap().start(30);
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    // Ticks while active
    let first = receiver.recv().unwrap();
    assert!(matches!(first, RestTimerEvent::Tick { seconds_left: 30 }));

    // Jump past expiry; the next tick completes
    clock.advance(31);
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    let events: Vec<RestTimerEvent> = receiver.try_iter().collect();
    assert!(events.contains(&RestTimerEvent::Completed));
    assert!(!timer.lock().unwrap().is_active());

    handle.abort();
}
