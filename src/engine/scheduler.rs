//! Cooperative delay scheduler driven by a periodic clock callback.
//!
//! ## Model
//!
//! Scheduled entries are kept in a queue sorted by absolute due time. Each
//! clock tick ([`FrameScheduler::tick`]) fires every entry whose due time
//! has passed; entries are removed on fire or on cancellation, never fired
//! twice. The tick source is external: a display-frame callback, a test
//! loop, or the built-in tokio-interval driver
//! ([`FrameScheduler::ensure_driving`], armed automatically by
//! [`FrameScheduler::add_task`]).
//!
//! ## Pause accounting
//!
//! [`FrameScheduler::pause`] halts the drive loop and records the pause
//! instant. [`FrameScheduler::start`] adds the paused duration to an idle
//! accumulator and shifts every queued due time forward by the same amount,
//! so wall-clock delays are measured in **active** time and are never
//! shortened by time spent paused.
//!
//! ## Cancelable delays
//!
//! [`FrameScheduler::delay`] returns a task that resolves when its entry
//! fires. A token canceled before the due time removes the entry and
//! settles the task as `Canceled`; exactly one of {fire, cancel} ever
//! settles a given delay task.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::cancellation::CancellationToken;
use crate::engine::task::{Task, TaskCompletionSource};


type EntryCallback = Box<dyn FnOnce() + Send>;

/// Identifier of a queued entry, unique per scheduler.
pub type EntryId = u64;

struct Entry {
    id: EntryId,
    due: Instant,
    callback: EntryCallback,
}

struct SchedulerState {
    /// Sorted ascending by `due`.
    entries: Vec<Entry>,
    next_id: EntryId,
    paused_at: Option<Instant>,
    idle_accumulated: Duration,
    driving: bool,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    period: Duration,
}

/// Single-threaded-in-spirit delay scheduler.
///
/// Cloning is cheap and shares the same queue. All mutation happens in
/// short critical sections; callbacks always run outside the lock.

#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
}

impl FrameScheduler {
    /// Creates a scheduler whose built-in driver ticks every `period`.
    pub fn new(period: Duration) -> Self {
        FrameScheduler {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    entries: Vec::new(),
                    next_id: 0,
                    paused_at: None,
                    idle_accumulated: Duration::ZERO,
                    driving: false,
                }),
                period,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues `callback` to fire once, `delay` of active time from now.
    ///
    /// Inserts in due-time order and (re)arms the drive loop if it is not
    /// already running. While paused, the delay counts from the moment the
    /// scheduler resumes.
    pub fn add_task<F>(&self, callback: F, delay: Duration) -> EntryId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut state = self.lock();
            let base = state.paused_at.unwrap_or_else(Instant::now);
            let due = base + delay;
            let id = state.next_id;
            state.next_id += 1;

            let at = state
                .entries
                .partition_point(|entry| entry.due <= due);
            state.entries.insert(
                at,
                Entry {
                    id,
                    due,
                    callback: Box::new(callback),
                },
            );
            id
        };
        self.ensure_driving();
        id
    }

    /// Removes a queued entry. Returns `false` if it already fired or was
    /// removed.
    pub fn remove(&self, id: EntryId) -> bool {
        let mut state = self.lock();
        match state.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                state.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of entries still queued.
    pub fn pending(&self) -> usize {
        self.lock().entries.len()
    }

    /// Total time the scheduler has spent paused.
    pub fn idle_time(&self) -> Duration {
        self.lock().idle_accumulated
    }

    /// Clock callback: fires every due entry.
    ///
    /// No-op while paused. Callbacks run outside the internal lock, in due
    /// order.
    pub fn tick(&self) {
        let fired: Vec<EntryCallback> = {
            let mut state = self.lock();
            if state.paused_at.is_some() {
                return;
            }
            let now = Instant::now();
            let count = state.entries.partition_point(|entry| entry.due <= now);
            state
                .entries
                .drain(..count)
                .map(|entry| entry.callback)
                .collect()
        };
        for callback in fired {
            callback();
        }
    }

    /// Halts the drive loop and records the pause instant.
    pub fn pause(&self) {
        let mut state = self.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(Instant::now());
            tracing::debug!("frame scheduler paused");
        }
    }

    /// Resumes after a pause.
    ///
    /// Adds the paused duration to the idle accumulator and shifts all
    /// queued due times forward by the same amount, then re-arms the drive
    /// loop if entries remain.
    pub fn start(&self) {
        {
            let mut state = self.lock();
            if let Some(paused_at) = state.paused_at.take() {
                let paused_for = Instant::now().saturating_duration_since(paused_at);
                state.idle_accumulated += paused_for;
                for entry in &mut state.entries {
                    entry.due += paused_for;
                }
                tracing::debug!(paused_ms = paused_for.as_millis() as u64, "frame scheduler resumed");
            }
        }
        self.ensure_driving();
    }

    /// Arms the built-in tokio-interval drive loop if needed.
    ///
    /// The loop ticks every configured period and stops itself once the
    /// queue drains or the scheduler pauses; [`FrameScheduler::add_task`]
    /// and [`FrameScheduler::start`] re-arm it.
    pub fn ensure_driving(&self) {
        {
            let mut state = self.lock();
            if state.driving || state.paused_at.is_some() || state.entries.is_empty() {
                return;
            }
            state.driving = true;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut clock = tokio::time::interval(scheduler.inner.period);
            clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                clock.tick().await;
                scheduler.tick();
                let mut state = scheduler.lock();
                if state.paused_at.is_some() || state.entries.is_empty() {
                    state.driving = false;
                    return;
                }
            }
        });
    }

    /// Returns a task that resolves after `delay` of active time.
    ///
    /// ## Semantics
    /// * An already-canceled token yields an immediately-`Canceled` task
    ///   and schedules nothing.
    /// * Otherwise a cancellation callback removes the queued entry and
    ///   settles the task as `Canceled`; only one of {fire, cancel} ever
    ///   settles it.
    pub fn delay(&self, delay: Duration, token: &CancellationToken) -> Task<()> {
        if token.is_cancellation_requested() {
            return Task::canceled();
        }

        let source = TaskCompletionSource::new();
        let on_fire = source.clone();
        let id = self.add_task(
            move || {
                on_fire.set_result(());
            },
            delay,
        );

        let scheduler = self.clone();
        let on_cancel = source.clone();
        token.register(move || {
            scheduler.remove(id);
            on_cancel.set_canceled();
        });

        source.task()
    }
}
