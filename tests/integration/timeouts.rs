//! Deadline enforcement and forced worker reclamation.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use enclave::{ExecuteRequest, ResponseCode, TIMEOUT_MESSAGE};

use crate::fixtures::primed_zone;

#[test]
fn test_timeout_produces_fixed_message() {
    let zone = primed_zone("timeout-msg", 1);
    let response = zone.execute_sync(
        ExecuteRequest::function("spin").with_timeout(Duration::from_millis(80)),
    );
    assert_eq!(response.code, ResponseCode::Timeout);
    assert!(response.return_value.is_none());
    assert_eq!(response.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
}

#[test]
fn test_timeout_fires_near_deadline() {
    let zone = primed_zone("timeout-clock", 1);
    let start = Instant::now();
    let response = zone.execute_sync(
        ExecuteRequest::function("spin").with_timeout(Duration::from_millis(150)),
    );
    let elapsed = start.elapsed();

    assert_eq!(response.code, ResponseCode::Timeout);
    assert!(elapsed >= Duration::from_millis(150), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "fired far too late: {:?}", elapsed);
}

#[test]
fn test_fast_call_unaffected_by_timeout() {
    let zone = primed_zone("timeout-fast", 1);
    let response = zone.execute_sync(
        ExecuteRequest::function("add")
            .with_arguments(["1", "2"])
            .with_timeout(Duration::from_secs(10)),
    );
    assert!(response.is_success());
    assert_eq!(response.return_value.as_deref(), Some("3"));
}

#[test]
fn test_unbounded_call_never_times_out_quickly() {
    // Without a timeout the call just runs; verify a parallel bounded call
    // on another worker still completes while it spins.
    let zone = std::sync::Arc::new(primed_zone("unbounded", 2));

    let (spin_tx, _spin_rx) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = spin_tx.send(response);
    });

    let response = zone.execute_sync(
        ExecuteRequest::function("add")
            .with_arguments(["2", "2"])
            .with_timeout(Duration::from_secs(5)),
    );
    assert_eq!(response.return_value.as_deref(), Some("4"));

    // Teardown reclaims the spinning worker
    zone.destroy();
}

#[test]
fn test_slow_timeout_does_not_disturb_fast_call() {
    let zone = std::sync::Arc::new(primed_zone("fast-vs-slow", 2));

    let (slow_tx, slow_rx) = mpsc::channel();
    zone.execute(
        ExecuteRequest::function("spin").with_timeout(Duration::from_millis(300)),
        move |response| {
            let _ = slow_tx.send(response);
        },
    );

    // Issued after the slow one; resolves well before it times out
    let start = Instant::now();
    let fast = zone.execute_sync(
        ExecuteRequest::function("add")
            .with_arguments(["2", "3"])
            .with_timeout(Duration::from_secs(5)),
    );
    assert!(fast.is_success(), "{:?}", fast);
    assert_eq!(fast.return_value.as_deref(), Some("5"));
    assert!(start.elapsed() < Duration::from_millis(250), "fast call was delayed by the slow one");

    let slow = slow_rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(slow.code, ResponseCode::Timeout);
}

#[test]
fn test_worker_recovers_after_timeout() {
    let zone = primed_zone("timeout-recover", 1);

    let timed_out = zone.execute_sync(
        ExecuteRequest::function("spin").with_timeout(Duration::from_millis(80)),
    );
    assert_eq!(timed_out.code, ResponseCode::Timeout);

    // The single worker was interrupted and reset; it must serve subsequent
    // calls again. Allow a few attempts while the reset completes.
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let response = zone.execute_sync(
            ExecuteRequest::function("add").with_arguments(["3", "4"]),
        );
        if response.is_success() {
            assert_eq!(response.return_value.as_deref(), Some("7"));
            break;
        }
        assert!(
            Instant::now() < deadline,
            "worker never recovered: {:?}",
            response
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_queued_task_expires_without_running() {
    let zone = std::sync::Arc::new(primed_zone("timeout-queued", 1));

    // Occupy the only worker with a longer-lived spin
    let (spin_tx, spin_rx) = mpsc::channel();
    zone.execute(
        ExecuteRequest::function("spin").with_timeout(Duration::from_millis(500)),
        move |response| {
            let _ = spin_tx.send(response);
        },
    );

    // The deadline is armed at enqueue, so this expires in the queue
    let start = Instant::now();
    let queued = zone.execute_sync(
        ExecuteRequest::function("add")
            .with_arguments(["1", "1"])
            .with_timeout(Duration::from_millis(60)),
    );
    assert_eq!(queued.code, ResponseCode::Timeout);
    assert!(start.elapsed() < Duration::from_millis(450), "expired only after the worker freed up");

    let spun = spin_rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(spun.code, ResponseCode::Timeout);
}

#[test]
fn test_concurrent_timeouts_each_get_one_response() {
    let zone = std::sync::Arc::new(primed_zone("timeout-many", 3));
    let (tx, rx) = mpsc::channel();

    for _ in 0..3 {
        let tx = tx.clone();
        zone.execute(
            ExecuteRequest::function("spin").with_timeout(Duration::from_millis(100)),
            move |response| {
                let _ = tx.send(response);
            },
        );
    }
    drop(tx);

    let mut responses = Vec::new();
    while let Ok(response) = rx.recv_timeout(Duration::from_secs(5)) {
        responses.push(response);
    }
    assert_eq!(responses.len(), 3);
    for response in responses {
        assert_eq!(response.code, ResponseCode::Timeout);
        assert_eq!(response.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
    }
}
