//! Worker bridge round trips: request/response routing, error surfacing,
//! cancellation, transferable payloads, and shutdown draining.

use std::collections::BTreeMap;
use std::time::Duration;

use taskforge::prelude::*;
use taskforge::{ActionRegistry, WorkerValue};


fn demo_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry
        .register("echo", |args, _token| async move {
            Ok(args.into_iter().next().unwrap_or(WorkerValue::Null))
        })
        .unwrap();

    registry
        .register("sum", |args, _token| async move {
            let mut total = 0i64;
            for arg in args {
                match arg {
                    WorkerValue::Int(v) => total += v,
                    other => return Err(format!("sum expects integers, got {other:?}")),
                }
            }
            Ok(WorkerValue::Int(total))
        })
        .unwrap();

    registry
        .register("reverse_bytes", |args, _token| async move {
            match args.into_iter().next() {
                Some(WorkerValue::Bytes(mut payload)) => {
                    payload.reverse();
                    Ok(WorkerValue::Bytes(payload))
                }
                other => Err(format!("reverse_bytes expects a payload, got {other:?}")),
            }
        })
        .unwrap();

    registry
        .register("slow", |_args, token| async move {
            for _ in 0..100 {
                if token.is_cancellation_requested() {
                    return Err("interrupted".to_string());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(WorkerValue::Null)
        })
        .unwrap();

    registry
}

#[tokio::test]
async fn dispatch_round_trips_a_value() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let task = bridge.dispatch(
        "echo",
        vec![WorkerValue::Text("hello".into())],
        &CancellationToken::none(),
    );
    assert_eq!(task.join().await.unwrap(), WorkerValue::Text("hello".into()));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_dispatches_route_by_id() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let none = CancellationToken::none();

    let tasks: Vec<_> = (0..10i64)
        .map(|i| {
            bridge.dispatch(
                "sum",
                vec![WorkerValue::Int(i), WorkerValue::Int(100)],
                &none,
            )
        })
        .collect();

    for (i, task) in tasks.iter().enumerate() {
        assert_eq!(
            task.join().await.unwrap(),
            WorkerValue::Int(i as i64 + 100)
        );
    }
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn remote_errors_fault_the_task_and_clear_the_pending_entry() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let task = bridge.dispatch(
        "sum",
        vec![WorkerValue::Text("not a number".into())],
        &CancellationToken::none(),
    );

    let outcome = task.join().await;
    assert!(matches!(outcome, Err(e) if !e.is_canceled()));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn unknown_actions_are_reported_not_crashed() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let task = bridge.dispatch("no_such_action", Vec::new(), &CancellationToken::none());

    match task.join().await {
        Err(TaskError::Faulted(cause)) => {
            assert!(cause.to_string().contains("no_such_action"));
        }
        other => panic!("expected a fault, got {other:?}"),
    }
}

#[tokio::test]
async fn binary_payloads_transfer_and_come_back() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let task = bridge.dispatch(
        "reverse_bytes",
        vec![WorkerValue::Bytes(vec![1, 2, 3, 4])],
        &CancellationToken::none(),
    );
    assert_eq!(
        task.join().await.unwrap(),
        WorkerValue::Bytes(vec![4, 3, 2, 1])
    );
}

#[tokio::test]
async fn nested_payloads_survive_the_envelope() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let nested = WorkerValue::Map(BTreeMap::from([
        ("label".to_string(), WorkerValue::Text("block".into())),
        ("payload".to_string(), WorkerValue::Bytes(vec![9, 8, 7])),
    ]));

    let task = bridge.dispatch("echo", vec![nested.clone()], &CancellationToken::none());
    assert_eq!(task.join().await.unwrap(), nested);
}

#[tokio::test]
async fn cancellation_settles_locally_before_the_worker_replies() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let source = CancellationSource::new();
    let token = source.token();

    let task = bridge.dispatch("slow", Vec::new(), &token);
    assert_eq!(bridge.pending_count(), 1);

    source.cancel();
    let outcome = task.join().await;
    assert!(matches!(outcome, Err(e) if e.is_canceled()));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn pre_canceled_token_dispatches_nothing() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let source = CancellationSource::new();
    let token = source.token();
    source.cancel();

    let task = bridge.dispatch("echo", vec![WorkerValue::Int(1)], &token);
    assert_eq!(task.status(), TaskStatus::Canceled);
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn shutdown_drains_pending_requests() {
    let bridge = WorkerBridge::spawn(demo_registry());
    let task = bridge.dispatch("slow", Vec::new(), &CancellationToken::none());

    bridge.shutdown();
    let outcome = task.join().await;
    assert!(matches!(outcome, Err(e) if !e.is_canceled()));
}
