//! Structural composition over [`Task<T>`].
//!
//! Join semantics are *join-but-not-order*: combinators await every task
//! they launched, but impose no ordering between the joined tasks
//! themselves. Cancellation is cooperative: once a token is observed, no
//! new iteration is launched, yet everything already launched is still
//! awaited before the combined task settles.

use futures::stream::{FuturesUnordered, StreamExt};

use crate::engine::cancellation::CancellationToken;
use crate::engine::error::{CancellationError, InvariantViolation, TaskError};
use crate::engine::task::Task;


/// Joins all tasks; succeeds only if every task succeeds.
///
/// ## Semantics
/// * Resolves with all results **in input order**.
/// * Rejects with the first failure (fault or cancellation) observed by the
///   underlying join.
/// * An empty input resolves with an empty vector.
pub fn when_all<T>(tasks: Vec<Task<T>>) -> Task<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    Task::spawn(async move {
        let joins = tasks.iter().map(|task| task.join());
        futures::future::try_join_all(joins).await
    })
}

/// Races tasks; succeeds with the **first task to settle**, either way.
///
/// The winning task itself is surfaced (not just its value) so the caller
/// can inspect which one won and why via its status and failure cause.
///
/// ## Errors
/// An empty input is an [`InvariantViolation`]: a race needs at least one
/// contestant.
pub fn when_any<T>(tasks: Vec<Task<T>>) -> Task<Task<T>>
where
    T: Clone + Send + Sync + 'static,
{
    Task::spawn(async move {
        if tasks.is_empty() {
            return Err(InvariantViolation {
                what: "when_any requires at least one task",
                details: "received an empty task list".to_string(),
            }
            .into());
        }

        let mut settled: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| async move {
                task.wait_settled().await;
                task
            })
            .collect();

        match settled.next().await {
            Some(winner) => Ok(winner),
            None => Err(TaskError::other("race set drained without a winner")),
        }
    })
}

/// Parallel loop over `[from, to)` with a synchronous body.
///
/// ## Semantics
/// * `body(i)` is invoked synchronously per index; a returned task joins
///   the in-flight set, `None` means the iteration completed inline.
/// * Launching stops as soon as `token` is observed canceled, but every
///   already-launched iteration is awaited before the loop settles.
/// * If any iteration fails, the loop rejects with the first failure
///   observed.
/// * If cancellation occurred at any point, the loop rejects with a
///   cancellation cause even when every launched iteration succeeded.
pub fn parallel_for<T, F>(
    from: i64,
    to: i64,
    mut body: F,
    token: CancellationToken,
) -> Task<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(i64) -> Option<Task<T>> + Send + 'static,
{
    Task::spawn(async move {
        let mut launched = Vec::new();
        for i in from..to {
            if token.is_cancellation_requested() {
                tracing::debug!(index = i, "parallel_for stopped launching");
                break;
            }
            if let Some(task) = body(i) {
                launched.push(task);
            }
        }

        // Await everything launched before settling, even on cancellation.
        let mut results = Vec::with_capacity(launched.len());
        let mut first_failure: Option<TaskError> = None;
        for task in &launched {
            match task.join().await {
                Ok(value) => results.push(value),
                Err(error) => {
                    if first_failure.is_none() {
                        first_failure = Some(error);
                    }
                }
            }
        }

        if let Some(error) = first_failure {
            return Err(error);
        }
        token.throw_if_cancellation_requested()?;
        Ok(results)
    })
}

/// Parallel loop whose body must return a task.
///
/// Identical to [`parallel_for`] without the synchronous-body shortcut.
pub fn for_async<T, F>(from: i64, to: i64, mut body: F, token: CancellationToken) -> Task<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(i64) -> Task<T> + Send + 'static,
{
    parallel_for(from, to, move |i| Some(body(i)), token)
}

/// Runs zero-argument task-returning thunks concurrently and joins them.
pub fn invoke<T>(actions: Vec<Box<dyn FnOnce() -> Task<T> + Send>>) -> Task<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let launched: Vec<Task<T>> = actions.into_iter().map(|action| action()).collect();
    when_all(launched)
}

/// Wraps a CPU closure as an already-running task.
///
/// The closure runs on the runtime's blocking-capable pool; a cancellation
/// observed before the closure starts settles the task as `Canceled`
/// without invoking it.
pub fn run<T, F>(work: F, token: CancellationToken) -> Task<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    Task::spawn(async move {
        token.throw_if_cancellation_requested()?;
        match tokio::task::spawn_blocking(work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(TaskError::other(message)),
            Err(join_error) => {
                if join_error.is_cancelled() {
                    Err(CancellationError.into())
                } else {
                    Err(TaskError::other(join_error.to_string()))
                }
            }
        }
    })
}
