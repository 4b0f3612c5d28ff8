//! Combinator semantics: join-all ordering, racing, parallel loops, and
//! cooperative cancellation of loop bodies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge::prelude::*;
use taskforge::{for_async, invoke, parallel_for, run, when_all, when_any};


#[tokio::test]
async fn when_all_preserves_input_order() {
    // Later tasks finish first; results still come back in input order.
    let tasks: Vec<Task<u64>> = (0..8u64)
        .map(|i| {
            Task::spawn(async move {
                tokio::time::sleep(Duration::from_millis(8 - i)).await;
                Ok(i * 10)
            })
        })
        .collect();

    let joined = when_all(tasks);
    let values = joined.join().await.unwrap();
    assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
}

#[tokio::test]
async fn when_all_rejects_on_first_failure() {
    let tasks = vec![
        Task::completed(1),
        Task::faulted(TaskError::other("broken")),
        Task::completed(3),
    ];
    let joined = when_all(tasks);
    let outcome = joined.join().await;
    assert!(matches!(outcome, Err(e) if !e.is_canceled()));
}

#[tokio::test]
async fn when_all_of_nothing_is_empty() {
    let joined: Task<Vec<u32>> = when_all(Vec::new());
    assert_eq!(joined.join().await.unwrap(), Vec::<u32>::new());
}

#[tokio::test]
async fn when_any_surfaces_the_first_settled_task() {
    let slow = Task::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("slow")
    });
    let fast = Task::completed("fast");

    let winner = when_any(vec![slow, fast]).join().await.unwrap();
    assert_eq!(winner.status(), TaskStatus::RanToCompletion);
    assert_eq!(winner.result().unwrap(), "fast");
}

#[tokio::test]
async fn when_any_wins_with_a_failure_too() {
    let slow = Task::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(1)
    });
    let doomed: Task<i32> = Task::faulted(TaskError::other("first to settle"));

    let winner = when_any(vec![slow, doomed]).join().await.unwrap();
    assert_eq!(winner.status(), TaskStatus::Faulted);
}

#[tokio::test]
async fn when_any_rejects_an_empty_race() {
    let raced: Task<Task<u32>> = when_any(Vec::new());
    assert!(raced.join().await.is_err());
}

#[tokio::test]
async fn parallel_for_joins_every_launched_iteration() {
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&counter);

    let loop_task = parallel_for(
        0,
        16,
        move |_i| {
            let observed = Arc::clone(&observed);
            Some(Task::spawn(async move {
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        },
        CancellationToken::none(),
    );

    loop_task.join().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn canceled_parallel_for_stops_launching_but_awaits_in_flight() {
    let source = CancellationSource::new();
    let token = source.token();

    let launched = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let body_launched = Arc::clone(&launched);
    let body_finished = Arc::clone(&finished);
    let cancel_after = 4;
    let cancel_source = source;

    let loop_task = parallel_for(
        0,
        1000,
        move |i| {
            if i == cancel_after {
                cancel_source.cancel();
            }
            body_launched.fetch_add(1, Ordering::SeqCst);
            let body_finished = Arc::clone(&body_finished);
            Some(Task::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                body_finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        },
        token,
    );

    let outcome = loop_task.join().await;
    assert!(matches!(outcome, Err(e) if e.is_canceled()));

    // Cancellation observed at the next index check; nothing near 1000 ran.
    let launched_count = launched.load(Ordering::SeqCst);
    assert!(launched_count <= cancel_after as usize + 1);
    // Every launched iteration was awaited before the loop settled.
    assert_eq!(finished.load(Ordering::SeqCst), launched_count);
}

#[tokio::test]
async fn for_async_requires_a_task_per_index() {
    let summed = for_async(
        1,
        5,
        |i| Task::completed(i),
        CancellationToken::none(),
    );
    let values = summed.join().await.unwrap();
    assert_eq!(values.iter().sum::<i64>(), 10);
}

#[tokio::test]
async fn invoke_launches_all_thunks_concurrently() {
    let actions: Vec<Box<dyn FnOnce() -> Task<u32> + Send>> = vec![
        Box::new(|| Task::completed(1)),
        Box::new(|| Task::spawn(async { Ok(2) })),
        Box::new(|| Task::completed(3)),
    ];
    let joined = invoke(actions);
    assert_eq!(joined.join().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn run_executes_a_cpu_closure_off_thread() {
    let task = run(
        || Ok((0..100u64).sum::<u64>()),
        CancellationToken::none(),
    );
    assert_eq!(task.join().await.unwrap(), 4950);
}

#[tokio::test]
async fn run_respects_a_pre_canceled_token() {
    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();

    let task: Task<u32> = run(|| unreachable!("closure must not run"), token);
    let outcome = task.join().await;
    assert!(matches!(outcome, Err(e) if e.is_canceled()));
}
