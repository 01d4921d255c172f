//! Concurrent `get_or_load` with and without load coalescing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_test_utils::fixtures::{harness, test_config, Harness};
use strata_test_utils::{init_tracing, GetOptions, SetOptions, StoreError, StrataError};

const CALLERS: usize = 16;

async fn race(h: &Harness<u32>) -> (Arc<AtomicU32>, Vec<u32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        let manager = h.manager.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            manager
                .get_or_load::<_, _, StrataError>(
                    "cold",
                    || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(n)
                    },
                    SetOptions::new(),
                )
                .await
        }));
    }

    let mut values = Vec::with_capacity(CALLERS);
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }
    (calls, values)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn uncoalesced_loads_settle_on_a_loaded_value() {
    init_tracing();
    let h: Harness<u32> = harness(test_config("app"));
    let (calls, values) = race(&h).await;

    let calls = calls.load(Ordering::SeqCst);
    assert!(calls >= 1);
    assert!(values.iter().all(|v| (1..=calls).contains(v)));

    let cached = h
        .manager
        .get("cold", GetOptions::bypass_l1())
        .await
        .unwrap()
        .unwrap();
    assert!((1..=calls).contains(&cached));
    assert_eq!(h.manager.get_stats().await.unwrap().loads, u64::from(calls));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_loads_run_the_loader_once() {
    init_tracing();
    let h: Harness<u32> = harness(test_config("app").with_coalesced_loads(true));
    let (calls, values) = race(&h).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| *v == 1));

    let stats = h.manager.get_stats().await.unwrap();
    assert_eq!(stats.loads, 1);
    // Waiters' re-checks are not counted as lookups.
    assert_eq!(stats.requests(), CALLERS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_waiters_retry_after_a_failed_load() {
    init_tracing();
    let h: Harness<u32> = harness(test_config("app").with_coalesced_loads(true));
    let attempts = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = h.manager.clone();
        let attempts = attempts.clone();
        handles.push(tokio::spawn(async move {
            manager
                .get_or_load::<_, _, StrataError>(
                    "flaky",
                    || async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        if n == 0 {
                            Err(StrataError::from(StoreError::Unavailable {
                                backend: "origin".into(),
                                reason: "first attempt fails".into(),
                            }))
                        } else {
                            Ok(7)
                        }
                    },
                    SetOptions::new(),
                )
                .await
        }));
    }

    let mut failures = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(value) => assert_eq!(value, 7),
            Err(_) => failures += 1,
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
