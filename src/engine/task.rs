//! Cancelable task handle with an observable status state machine.
//!
//! ## Model
//!
//! A [`Task<T>`] is a shared handle onto a settle-once cell:
//!
//! ```text
//! Created → Running → { RanToCompletion | Faulted | Canceled }
//! ```
//!
//! Terminal states never change. The task owns its terminal outcome;
//! consumers observe it through [`Task::join`], [`Task::then`] or
//! [`Task::continue_with`], never mutate it. A rejection whose cause wraps a
//! [`CancellationError`] settles the task as `Canceled`; every other
//! rejection settles it as `Faulted`.
//!
//! ## Construction
//!
//! * [`Task::from_executor`] — synchronous two-argument executor in the
//!   resolve/reject style. The executor runs inside the constructor; an
//!   error it returns settles the task instead of propagating out.
//! * [`Task::spawn`] — wraps a future on the tokio runtime and settles on
//!   its completion.
//! * [`TaskCompletionSource`] — externally settled task, used by the frame
//!   scheduler and the worker bridge.
//!
//! ## Continuations
//!
//! [`Task::then`] chains only on success; [`Task::continue_with`] runs
//! **regardless of outcome** and is handed the settled task itself, so the
//! continuation can branch on status and cause.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::engine::error::{ResultAccessError, TaskError, TaskResult};


/// Observable lifecycle of a task.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Constructed but not yet started.
    Created,
    /// Work is in flight.
    Running,
    /// Settled with a value.
    RanToCompletion,
    /// Settled with a non-cancellation error.
    Faulted,
    /// Settled by a cancellation signal.
    Canceled,
}

impl TaskStatus {
    /// Returns `true` for the three terminal states.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::RanToCompletion | TaskStatus::Faulted | TaskStatus::Canceled
        )
    }
}

struct TaskCell<T> {
    status: TaskStatus,
    outcome: Option<TaskResult<T>>,
}

struct TaskShared<T> {
    cell: Mutex<TaskCell<T>>,
    settled: Notify,
}

impl<T> TaskShared<T> {
    fn new(status: TaskStatus) -> Arc<Self> {
        Arc::new(TaskShared {
            cell: Mutex::new(TaskCell {
                status,
                outcome: None,
            }),
            settled: Notify::new(),
        })
    }

    /// Settles the cell; the first call wins, later calls are no-ops.
    fn settle(&self, outcome: TaskResult<T>) -> bool {
        {
            let mut cell = self
                .cell
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if cell.status.is_terminal() {
                return false;
            }
            cell.status = match &outcome {
                Ok(_) => TaskStatus::RanToCompletion,
                Err(e) if e.is_canceled() => TaskStatus::Canceled,
                Err(_) => TaskStatus::Faulted,
            };
            cell.outcome = Some(outcome);
        }
        self.settled.notify_waiters();
        true
    }
}

/// A cancelable future handle with an observable terminal status.
///
/// Cloning is cheap and shares the same settle-once cell.

pub struct Task<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Resolve half of a [`Task::from_executor`] executor.
///
/// Consuming it settles the task with a value; if the task already settled,
/// the call is a no-op.

pub struct Resolve<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> Resolve<T> {
    /// Settles the task as `RanToCompletion` with `value`.
    pub fn resolve(self, value: T) {
        self.shared.settle(Ok(value));
    }
}

/// Reject half of a [`Task::from_executor`] executor.

pub struct Reject<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> Reject<T> {
    /// Settles the task as `Faulted`, or `Canceled` when the error wraps a
    /// cancellation cause.
    pub fn reject(self, error: TaskError) {
        self.shared.settle(Err(error));
    }
}

impl<T> Task<T> {
    /// Builds a task from a synchronous resolve/reject executor.
    ///
    /// ## Semantics
    /// * The status is `Running` before the executor is invoked, even when
    ///   no asynchronous step follows.
    /// * An `Err` returned by the executor settles the task (classified as
    ///   `Canceled` when the error wraps a cancellation cause) and never
    ///   propagates out of the constructor.
    /// * The first of {resolve, reject, executor error} wins; the rest are
    ///   no-ops.
    pub fn from_executor<F>(executor: F) -> Self
    where
        F: FnOnce(Resolve<T>, Reject<T>) -> Result<(), TaskError>,
    {
        let shared = TaskShared::new(TaskStatus::Running);
        let resolve = Resolve {
            shared: Arc::clone(&shared),
        };
        let reject = Reject {
            shared: Arc::clone(&shared),
        };
        if let Err(error) = executor(resolve, reject) {
            shared.settle(Err(error));
        }
        Task { shared }
    }

    /// Spawns `future` on the tokio runtime and settles on its completion.
    ///
    /// The status is `Running` from the moment this returns.
    pub fn spawn<F>(future: F) -> Self
    where
        T: Send + 'static,
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let shared = TaskShared::new(TaskStatus::Running);
        let settler = Arc::clone(&shared);
        tokio::spawn(async move {
            let outcome = future.await;
            settler.settle(outcome);
        });
        Task { shared }
    }

    /// Returns a task already settled as `RanToCompletion`.
    pub fn completed(value: T) -> Self {
        let shared = TaskShared::new(TaskStatus::Running);
        shared.settle(Ok(value));
        Task { shared }
    }

    /// Returns a task already settled as `Faulted` (or `Canceled` when the
    /// error carries a cancellation cause).
    pub fn faulted(error: TaskError) -> Self {
        let shared = TaskShared::new(TaskStatus::Running);
        shared.settle(Err(error));
        Task { shared }
    }

    /// Returns a task already settled as `Canceled`.
    pub fn canceled() -> Self {
        Task::faulted(TaskError::Canceled(
            crate::engine::error::CancellationError,
        ))
    }

    /// Current status snapshot.
    pub fn status(&self) -> TaskStatus {
        self.shared
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .status
    }

    /// Captured failure cause, if the task settled unsuccessfully.
    pub fn failure(&self) -> Option<TaskError> {
        let cell = self
            .shared
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &cell.outcome {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Awaits settlement without observing the value.
    pub async fn wait_settled(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.status().is_terminal() {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Task<T> {
    /// Reads the terminal value.
    ///
    /// ## Errors
    /// * [`ResultAccessError::NotSettled`] before settlement,
    /// * [`ResultAccessError::Faulted`] with the captured cause,
    /// * [`ResultAccessError::Canceled`] after cancellation.
    ///
    /// Never substitutes a default value.
    pub fn result(&self) -> Result<T, ResultAccessError> {
        let cell = self
            .shared
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &cell.outcome {
            None => Err(ResultAccessError::NotSettled),
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(TaskError::Canceled(_))) => Err(ResultAccessError::Canceled),
            Some(Err(TaskError::Faulted(cause))) => {
                Err(ResultAccessError::Faulted(cause.clone()))
            }
        }
    }

    /// Awaits settlement and returns the outcome.
    pub async fn join(&self) -> TaskResult<T> {
        self.wait_settled().await;
        let cell = self
            .shared
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &cell.outcome {
            Some(outcome) => outcome.clone(),
            // settle() stores the outcome before notifying, so a settled
            // task always has one.
            None => Err(TaskError::other("task settled without an outcome")),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Task<T> {
    /// Chains a continuation that runs only on success.
    ///
    /// A failure of `self` (fault or cancellation) propagates into the new
    /// task untouched.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> TaskResult<U> + Send + 'static,
    {
        let source = self.clone();
        Task::spawn(async move {
            let value = source.join().await?;
            on_fulfilled(value)
        })
    }

    /// Chains a continuation that runs only on failure.
    ///
    /// The handler may recover (return `Ok`) or re-fail; a success of `self`
    /// passes through untouched.
    pub fn catch<F>(&self, on_rejected: F) -> Task<T>
    where
        F: FnOnce(TaskError) -> TaskResult<T> + Send + 'static,
    {
        let source = self.clone();
        Task::spawn(async move {
            match source.join().await {
                Ok(value) => Ok(value),
                Err(error) => on_rejected(error),
            }
        })
    }

    /// Chains an unconditional continuation.
    ///
    /// `f` runs after settlement **regardless of outcome** and receives the
    /// settled task itself, so it can branch on [`Task::status`] and
    /// [`Task::failure`]. Whatever `f` returns becomes the new task's
    /// settlement.
    pub fn continue_with<U, F>(&self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(&Task<T>) -> TaskResult<U> + Send + 'static,
    {
        let source = self.clone();
        Task::spawn(async move {
            source.wait_settled().await;
            f(&source)
        })
    }
}

/// Externally settled task, in the completion-source style.
///
/// ## Role
/// Producers that settle from a callback (a scheduler entry firing, a worker
/// response arriving, a cancellation callback) hold the source and hand out
/// [`TaskCompletionSource::task`]. The first settle wins; later calls are
/// no-ops, which is what makes "only one of {fire, cancel} settles" cheap to
/// guarantee.

pub struct TaskCompletionSource<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> Clone for TaskCompletionSource<T> {
    fn clone(&self) -> Self {
        TaskCompletionSource {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> TaskCompletionSource<T> {
    /// Creates a source whose task is `Running` and unsettled.
    pub fn new() -> Self {
        TaskCompletionSource {
            shared: TaskShared::new(TaskStatus::Running),
        }
    }

    /// The task observing this source.
    pub fn task(&self) -> Task<T> {
        Task {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Settles as `RanToCompletion`. Returns `false` if already settled.
    pub fn set_result(&self, value: T) -> bool {
        self.shared.settle(Ok(value))
    }

    /// Settles as `Faulted`/`Canceled` per the error's classification.
    pub fn set_error(&self, error: TaskError) -> bool {
        self.shared.settle(Err(error))
    }

    /// Settles as `Canceled`.
    pub fn set_canceled(&self) -> bool {
        self.shared.settle(Err(TaskError::Canceled(
            crate::engine::error::CancellationError,
        )))
    }
}

impl<T> Default for TaskCompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::{CancellationError, FaultCause};

    #[test]
    fn executor_runs_synchronously_and_first_settle_wins() {
        let task = Task::from_executor(|resolve, _reject| {
            resolve.resolve(7);
            Ok(())
        });
        assert_eq!(task.status(), TaskStatus::RanToCompletion);
        assert_eq!(task.result(), Ok(7));
    }

    #[test]
    fn executor_error_settles_instead_of_propagating() {
        let task: Task<i32> =
            Task::from_executor(|_resolve, _reject| Err(TaskError::other("boom")));
        assert_eq!(task.status(), TaskStatus::Faulted);
        assert!(matches!(
            task.result(),
            Err(ResultAccessError::Faulted(FaultCause::Other(_)))
        ));
    }

    #[test]
    fn cancellation_cause_classifies_as_canceled() {
        let task: Task<i32> = Task::from_executor(|_resolve, reject| {
            reject.reject(TaskError::Canceled(CancellationError));
            Ok(())
        });
        assert_eq!(task.status(), TaskStatus::Canceled);
        assert_eq!(task.result(), Err(ResultAccessError::Canceled));
    }

    #[test]
    fn result_before_settlement_is_not_settled() {
        let source: TaskCompletionSource<u32> = TaskCompletionSource::new();
        let task = source.task();
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.result(), Err(ResultAccessError::NotSettled));

        assert!(source.set_result(1));
        assert!(!source.set_result(2));
        assert_eq!(task.result(), Ok(1));
    }

    #[tokio::test]
    async fn spawn_settles_through_join() {
        let task = Task::spawn(async { Ok(21 * 2) });
        assert_eq!(task.join().await, Ok(42));
        assert_eq!(task.status(), TaskStatus::RanToCompletion);
    }

    #[tokio::test]
    async fn then_only_runs_on_success() {
        let ok = Task::completed(10).then(|v| Ok(v + 1));
        assert_eq!(ok.join().await, Ok(11));

        let failed: Task<i32> = Task::faulted(TaskError::other("nope"));
        let chained = failed.then(|v| Ok(v + 1));
        assert!(matches!(chained.join().await, Err(e) if !e.is_canceled()));
    }

    #[tokio::test]
    async fn continue_with_runs_regardless_of_outcome() {
        let failed: Task<i32> = Task::canceled();
        let observed = failed.continue_with(|t| Ok(t.status()));
        assert_eq!(observed.join().await, Ok(TaskStatus::Canceled));

        let succeeded = Task::completed(5).continue_with(|t| t.result().map_err(
            |e| TaskError::other(e.to_string()),
        ));
        assert_eq!(succeeded.join().await, Ok(5));
    }

    #[tokio::test]
    async fn catch_recovers_a_failure() {
        let failed: Task<i32> = Task::faulted(TaskError::other("transient"));
        let recovered = failed.catch(|_| Ok(0));
        assert_eq!(recovered.join().await, Ok(0));
    }
}
