//! Frame-scheduler timing semantics, exercised on tokio's paused clock so
//! pause/resume accounting is deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge::prelude::*;


const TICK: Duration = Duration::from_millis(10);

#[tokio::test(start_paused = true)]
async fn delay_fires_after_the_requested_time() {
    let scheduler = FrameScheduler::new(TICK);
    let before = tokio::time::Instant::now();

    let delayed = scheduler.delay(Duration::from_millis(50), &CancellationToken::none());
    delayed.join().await.unwrap();

    assert!(before.elapsed() >= Duration::from_millis(50));
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.idle_time(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn entries_fire_in_due_order() {
    let scheduler = FrameScheduler::new(TICK);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    for (tag, delay_ms) in [(3u32, 90u64), (1, 30), (2, 60)] {
        let order = Arc::clone(&order);
        scheduler.add_task(
            move || order.lock().unwrap().push(tag),
            Duration::from_millis(delay_ms),
        );
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn paused_time_does_not_shorten_delays() {
    let scheduler = FrameScheduler::new(TICK);
    let fired = Arc::new(AtomicUsize::new(0));

    let observed = Arc::clone(&fired);
    scheduler.add_task(
        move || {
            observed.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    );

    scheduler.pause();
    tokio::time::advance(Duration::from_millis(200)).await;

    // Well past the nominal due time, but the scheduler was paused.
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.pending(), 1);

    scheduler.start();
    assert_eq!(scheduler.idle_time(), Duration::from_millis(200));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_time_accumulates_across_pauses() {
    let scheduler = FrameScheduler::new(TICK);

    scheduler.pause();
    tokio::time::advance(Duration::from_millis(30)).await;
    scheduler.start();

    scheduler.pause();
    tokio::time::advance(Duration::from_millis(45)).await;
    scheduler.start();

    assert_eq!(scheduler.idle_time(), Duration::from_millis(75));
}

#[tokio::test(start_paused = true)]
async fn canceled_delay_never_fires() {
    let scheduler = FrameScheduler::new(TICK);
    let source = CancellationSource::new();
    let token = source.token();

    let delayed = scheduler.delay(Duration::from_secs(1), &token);
    assert_eq!(scheduler.pending(), 1);

    source.cancel();
    let outcome = delayed.join().await;
    assert!(matches!(outcome, Err(e) if e.is_canceled()));
    assert_eq!(scheduler.pending(), 0);

    // Long after the original due time, the task is still just Canceled.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(delayed.status(), TaskStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn pre_canceled_token_schedules_nothing() {
    let scheduler = FrameScheduler::new(TICK);
    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();

    let delayed = scheduler.delay(Duration::from_millis(10), &token);
    assert_eq!(delayed.status(), TaskStatus::Canceled);
    assert_eq!(scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_entries_do_not_fire() {
    let scheduler = FrameScheduler::new(TICK);
    let fired = Arc::new(AtomicUsize::new(0));

    let observed = Arc::clone(&fired);
    let id = scheduler.add_task(
        move || {
            observed.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(20),
    );

    assert!(scheduler.remove(id));
    assert!(!scheduler.remove(id));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
