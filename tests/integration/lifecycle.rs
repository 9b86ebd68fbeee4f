//! Zone destruction, proxies, and configuration plumbing.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use enclave::{ExecuteRequest, ResponseCode, Zone, ZoneProxy};

use crate::fixtures::{bare_zone, primed_zone};

#[test]
fn test_destroy_rejects_new_operations() {
    let zone = bare_zone("destroy-reject", 2);
    zone.destroy();

    assert_eq!(
        zone.broadcast_sync("function f() { return 1; }"),
        ResponseCode::InternalError
    );
    let response = zone.execute_sync(ExecuteRequest::function("f"));
    assert_eq!(response.code, ResponseCode::InternalError);
}

#[test]
fn test_destroy_twice_is_harmless() {
    let zone = bare_zone("destroy-twice", 1);
    zone.destroy();
    zone.destroy();
    assert!(zone.is_destroyed());
}

#[test]
fn test_destroy_unblocks_unbounded_spin() {
    let zone = primed_zone("destroy-spin", 1);

    let (tx, rx) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = tx.send(response);
    });
    std::thread::sleep(Duration::from_millis(50));

    // Destroy must complete promptly despite the non-cooperative call, and
    // the pending request still gets its one response.
    let start = Instant::now();
    zone.destroy();
    assert!(start.elapsed() < Duration::from_secs(5));

    let response = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(response.code, ResponseCode::InternalError);
}

#[test]
fn test_destroy_completes_with_queued_spin() {
    let zone = primed_zone("destroy-queued-spin", 1);

    // One spin running, a second queued behind it. The queued one must be
    // failed during teardown, not executed after the first is interrupted.
    let (tx1, rx1) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = tx1.send(response);
    });
    let (tx2, rx2) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = tx2.send(response);
    });
    std::thread::sleep(Duration::from_millis(50));

    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        zone.destroy();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("destroy hung on a queued non-terminating task");

    let first = rx1.recv_timeout(Duration::from_secs(1)).unwrap();
    let second = rx2.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.code, ResponseCode::InternalError);
    assert_eq!(second.code, ResponseCode::InternalError);
}

#[test]
fn test_drop_destroys_zone() {
    let zone = primed_zone("drop-zone", 1);
    let (tx, rx) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = tx.send(response);
    });
    std::thread::sleep(Duration::from_millis(50));

    drop(zone);

    // The in-flight call was settled during drop
    let response = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(response.code, ResponseCode::InternalError);
}

#[test]
fn test_queued_work_settled_on_destroy() {
    let zone = Arc::new(primed_zone("destroy-queued", 1));

    let (spin_tx, spin_rx) = mpsc::channel();
    zone.execute(ExecuteRequest::function("spin"), move |response| {
        let _ = spin_tx.send(response);
    });

    // Queued behind the spin; must not be silently dropped
    let (queued_tx, queued_rx) = mpsc::channel();
    zone.execute(
        ExecuteRequest::function("add").with_arguments(["1", "1"]),
        move |response| {
            let _ = queued_tx.send(response);
        },
    );

    std::thread::sleep(Duration::from_millis(50));
    zone.destroy();

    assert!(spin_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    let queued = queued_rx.recv_timeout(Duration::from_secs(3)).unwrap();
    // Either it squeaked through before teardown or it was failed; it is
    // never lost.
    assert!(
        queued.is_success() || queued.code == ResponseCode::InternalError,
        "{:?}",
        queued
    );
}

#[test]
fn test_proxy_clones_share_one_zone() {
    let proxy = ZoneProxy::new("proxy-shared", "--workers 2").unwrap();
    let clone = proxy.clone();

    assert_eq!(
        proxy.broadcast_sync("function f() { return 'via-proxy'; }"),
        ResponseCode::Success
    );
    let response = clone.execute_sync(ExecuteRequest::function("f"));
    assert_eq!(response.return_value.as_deref(), Some("\"via-proxy\""));

    clone.destroy();
    assert!(proxy.zone().is_destroyed());
    assert_eq!(
        proxy.broadcast_sync("var x = 1;"),
        ResponseCode::InternalError
    );
}

#[test]
fn test_zone_reports_configuration() {
    let zone = Zone::new("configured", "--workers 5").unwrap();
    assert_eq!(zone.name(), "configured");
    assert_eq!(zone.worker_count(), 5);
    assert_eq!(zone.settings().workers, 5);
}

#[test]
fn test_invalid_settings_rejected() {
    assert!(Zone::new("bad-flag", "--bogus 1").is_err());
    assert!(Zone::new("zero-workers", "--workers 0").is_err());
    assert!(Zone::new("no-value", "--workers").is_err());
}

#[test]
fn test_many_zones_coexist() {
    let zones: Vec<Zone> = (0..4)
        .map(|i| {
            let zone = bare_zone(&format!("multi-{}", i), 1);
            assert_eq!(
                zone.broadcast_sync(&format!("function which() {{ return {}; }}", i)),
                ResponseCode::Success
            );
            zone
        })
        .collect();

    for (i, zone) in zones.iter().enumerate() {
        let response = zone.execute_sync(ExecuteRequest::function("which"));
        assert_eq!(response.return_value.as_deref(), Some(i.to_string().as_str()));
    }
}
