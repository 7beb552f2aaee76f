//! Correlation, timeout and teardown behavior of worker connections.

mod common;

use bytes::Bytes;
use common::{attach, wait_for_workers};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tickets_dispatch::{Coordinator, CoordinatorConfig, DispatchError};
use tickets_protocol::{Payload, TaskResult};

fn coordinator_without_master() -> Coordinator {
    Coordinator::spawn(CoordinatorConfig {
        master_participates: false,
        seed: Some(11),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_concurrent_calls_get_unique_transaction_ids() {
    let coordinator = coordinator_without_master();
    let mut worker = attach(&coordinator, "10.0.0.1:5000", Duration::from_secs(10));

    let mut calls = Vec::new();
    for i in 0..50 {
        let connection = worker.connection.clone();
        calls.push(tokio::spawn(async move {
            let url = format!("https://a.test/q?n={}", i);
            let body = connection.execute_remote_task(&url).await.unwrap();
            (url, body)
        }));
    }

    let mut pending = Vec::new();
    let mut seen = HashSet::new();
    for _ in 0..50 {
        let request = worker.next_request().await;
        assert!(seen.insert(request.transaction_id), "duplicate transaction id");
        pending.push(request);
    }

    // Answer newest first; each caller must still get its own URL back.
    for request in pending.into_iter().rev() {
        let Payload::TaskRequest(task) = request.payload else {
            panic!("expected task request");
        };
        worker.reply(request.transaction_id, TaskResult::success(task.target_url.into_bytes()));
    }

    for call in calls {
        let (url, body) = call.await.unwrap();
        assert_eq!(body, Bytes::from(url));
    }
    assert_eq!(worker.connection.health().total_requests(), 50);
    assert_eq!(worker.connection.health().failed_requests(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let coordinator = coordinator_without_master();
    let mut worker = attach(&coordinator, "10.0.0.1:5000", Duration::from_secs(10));

    let a = {
        let connection = worker.connection.clone();
        tokio::spawn(async move { connection.execute_remote_task("https://a.test/A").await })
    };
    let first = worker.next_request().await;

    let b = {
        let connection = worker.connection.clone();
        tokio::spawn(async move { connection.execute_remote_task("https://a.test/B").await })
    };
    let second = worker.next_request().await;
    assert!(second.transaction_id > first.transaction_id);

    worker.reply(second.transaction_id, TaskResult::success(&b"body-B"[..]));
    worker.reply(first.transaction_id, TaskResult::success(&b"body-A"[..]));

    assert_eq!(a.await.unwrap().unwrap(), Bytes::from_static(b"body-A"));
    assert_eq!(b.await.unwrap().unwrap(), Bytes::from_static(b"body-B"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_worker_times_out_at_ceiling() {
    let coordinator = coordinator_without_master();
    let worker = attach(&coordinator, "10.0.0.1:5000", Duration::from_secs(10));
    let health = worker.connection.health();
    let timed_out_before = health.timed_out_requests();

    let started = tokio::time::Instant::now();
    let err = worker
        .connection
        .execute_remote_task("https://a.test/never")
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, DispatchError::Timeout { .. }));
    assert!(err.is_retryable());
    assert!(waited >= Duration::from_secs(10));
    assert!(waited < Duration::from_secs(10) + Duration::from_millis(100));
    assert_eq!(health.timed_out_requests(), timed_out_before + 1);
    assert_eq!(health.failed_requests(), 1);
    assert_eq!(health.average_latency(), None);
}

#[tokio::test]
async fn test_transport_failure_tears_connection_down() {
    let coordinator = coordinator_without_master();
    let mut worker = attach(&coordinator, "10.0.0.1:5000", Duration::from_secs(10));
    wait_for_workers(&coordinator, 1).await;

    worker
        .replies
        .unbounded_send(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        )))
        .unwrap();

    wait_for_workers(&coordinator, 0).await;

    // The send loop closes its half of the transport.
    let drained = tokio::time::timeout(Duration::from_secs(1), worker.requests.next())
        .await
        .expect("send loop still running");
    assert!(drained.is_none());

    assert!(!worker.connection.is_alive());
    let err = worker
        .connection
        .execute_remote_task("https://a.test/q")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ConnectionClosed));

    for _ in 0..20 {
        assert!(coordinator.pick_one().await.is_none());
    }
}

#[tokio::test]
async fn test_peer_close_unregisters() {
    let coordinator = coordinator_without_master();
    let worker = attach(&coordinator, "10.0.0.1:5000", Duration::from_secs(10));
    wait_for_workers(&coordinator, 1).await;

    drop(worker.replies);

    wait_for_workers(&coordinator, 0).await;
    assert!(!worker.connection.is_alive());
}
