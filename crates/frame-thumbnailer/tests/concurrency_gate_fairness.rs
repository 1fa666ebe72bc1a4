use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frame_thumbnailer::ThumbnailError;
use frame_thumbnailer::services::ConcurrencyGate;

/// Waiters queued behind a full gate are admitted in arrival order, and the
/// number of tickets held never exceeds the capacity.
#[tokio::test(start_paused = true)]
async fn test_fifo_admission_under_contention() {
    let gate = ConcurrencyGate::new(2);
    let admitted = Arc::new(Mutex::new(Vec::new()));
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let first = gate.acquire().await.unwrap();
    let second = gate.acquire().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10usize {
        let gate_clone = gate.clone();
        let admitted = admitted.clone();
        let live = live.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            gate_clone
                .with_permit(|| async {
                    admitted.lock().unwrap().push(i);
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ThumbnailError>(())
                })
                .await
        }));
        while gate.waiting() < i + 1 {
            tokio::task::yield_now().await;
        }
    }

    assert_eq!(gate.outstanding(), 2);
    gate.release(first);
    gate.release(second);

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(*admitted.lock().unwrap(), (0..10).collect::<Vec<_>>());
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(gate.outstanding(), 0);
    assert_eq!(gate.waiting(), 0);
}

/// A waiter that gives up leaves the queue without consuming a slot.
#[tokio::test]
async fn test_abandoned_waiter_does_not_leak_a_slot() {
    let gate = ConcurrencyGate::new(1);
    let held = gate.acquire().await.unwrap();

    let waiter_gate = gate.clone();
    let waiter = tokio::spawn(async move { waiter_gate.acquire().await.map(|_| ()) });
    while gate.waiting() == 0 {
        tokio::task::yield_now().await;
    }
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(gate.waiting(), 0);

    drop(held);
    let ticket = gate.acquire().await.unwrap();
    assert_eq!(gate.outstanding(), 1);
    gate.release(ticket);
    assert_eq!(gate.outstanding(), 0);
}
