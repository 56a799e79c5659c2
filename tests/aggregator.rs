//! Flush triggers, settlement and cancellation of the aggregator.

use aggregate_fn::{params, Aggregator, AggregatorConfig, Error, Params};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready, task};

const FOREVER: Duration = Duration::from_secs(999_999);

#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn doubling(counter: &Counter, max_wait: Duration, max_items: usize) -> Aggregator<i32, i32> {
    let counter = counter.clone();
    Aggregator::builder(move |inputs: Vec<i32>| {
        counter.bump();
        async move { Ok::<_, std::io::Error>(inputs.into_iter().map(|n| n * 2).collect()) }
    })
    .with_config(
        AggregatorConfig::new()
            .with_max_wait(max_wait)
            .with_max_items(max_items),
    )
    .build()
    .unwrap()
}

fn rejecting(counter: &Counter) -> Aggregator<i32, i32> {
    let counter = counter.clone();
    Aggregator::builder(move |_inputs: Vec<i32>| {
        counter.bump();
        async move { Err::<Vec<i32>, _>(anyhow::anyhow!("fn_error")) }
    })
    .with_max_wait(FOREVER)
    .with_max_items(usize::MAX)
    .build()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_flushes_when_max_items_reached() {
    let counter = Counter::default();
    let agg = doubling(&counter, FOREVER, 3);

    let res1 = agg.call(1);
    let res2 = agg.call(2);
    assert_eq!(agg.pending(), 2);
    let res3 = agg.call(3);
    assert_eq!(agg.pending(), 0);
    assert!(!agg.snapshot().timer_armed);

    assert_eq!(res1.await.unwrap(), 2);
    assert_eq!(res2.await.unwrap(), 4);
    assert_eq!(res3.await.unwrap(), 6);
    assert_eq!(counter.get(), 1);

    // The timer armed by the first call must never fire for this batch.
    tokio::time::sleep(FOREVER * 2).await;
    assert_eq!(counter.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flushes_when_max_wait_elapsed() {
    let counter = Counter::default();
    let agg = doubling(&counter, Duration::from_millis(300), usize::MAX);

    let res1 = agg.call(1);
    let res2 = agg.call(2);
    let res3 = agg.call(3);

    tokio::time::advance(Duration::from_millis(299)).await;
    assert_eq!(counter.get(), 0);
    assert_eq!(agg.pending(), 3);

    tokio::time::advance(Duration::from_millis(2)).await;
    assert_eq!(res1.await.unwrap(), 2);
    assert_eq!(res2.await.unwrap(), 4);
    assert_eq!(res3.await.unwrap(), 6);
    assert_eq!(counter.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flushes_on_demand() {
    let counter = Counter::default();
    let agg = doubling(&counter, FOREVER, usize::MAX);

    let mut res1 = task::spawn(agg.call(1));
    let res2 = agg.call(2);
    let res3 = agg.call(3);
    assert_eq!(counter.get(), 0);
    assert_pending!(res1.poll());

    agg.flush().await.unwrap();

    // Settled before flush() returned.
    assert_eq!(assert_ready!(res1.poll()).unwrap(), 2);
    assert_eq!(res2.await.unwrap(), 4);
    assert_eq!(res3.await.unwrap(), 6);
    assert_eq!(counter.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_rejects_without_invoking() {
    let counter = Counter::default();
    let agg = doubling(&counter, FOREVER, usize::MAX);

    let res1 = agg.call(1);
    let res2 = agg.call(2);
    let res3 = agg.call(3);

    assert_eq!(agg.cancel(), 3);

    for res in [res1, res2, res3] {
        let err = res.await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "operation cancelled");
    }
    assert_eq!(counter.get(), 0);
    assert!(agg.is_idle());

    // The cancelled batch's timer is gone too.
    tokio::time::sleep(FOREVER * 2).await;
    assert_eq!(counter.get(), 0);
}

#[tokio::test]
async fn test_bulk_failure_rejects_every_call() {
    let counter = Counter::default();
    let agg = rejecting(&counter);

    let res1 = agg.call(1);
    let res2 = agg.call(2);
    let res3 = agg.call(3);
    assert_eq!(counter.get(), 0);

    let stats = agg.flush().await.unwrap();
    assert!(!stats.ok);

    for res in [res1, res2, res3] {
        let err = res.await.unwrap_err();
        assert!(err.is_bulk_failure());
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("fn_error"));
        assert_eq!(
            err.bulk_source().map(|e| e.to_string()),
            Some("fn_error".to_string())
        );
    }
    assert_eq!(counter.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_size_time_and_manual_triggers_in_sequence() {
    let counter = Counter::default();
    let agg = doubling(&counter, Duration::from_millis(100), 3);

    let (a, b, c) = tokio::join!(agg.call(1), agg.call(2), agg.call(3));
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (2, 4, 6));
    assert_eq!(counter.get(), 1);

    let res4 = agg.call(1);
    let res5 = agg.call(2);
    assert_eq!(counter.get(), 1);
    tokio::time::advance(Duration::from_millis(101)).await;
    assert_eq!(res4.await.unwrap(), 2);
    assert_eq!(res5.await.unwrap(), 4);
    assert_eq!(counter.get(), 2);

    let res6 = agg.call(1);
    agg.flush().await.unwrap();
    assert_eq!(res6.await.unwrap(), 2);
    assert_eq!(counter.get(), 3);
}

#[tokio::test]
async fn test_multiple_params() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_bulk = Arc::clone(&seen);
    let agg = Aggregator::builder(move |inputs: Vec<Params<i32>>| {
        seen_bulk.lock().unwrap().extend(inputs.iter().cloned());
        async move {
            Ok::<_, std::io::Error>(
                inputs
                    .into_iter()
                    .map(|p| p.into_vec().into_iter().sum::<i32>())
                    .collect(),
            )
        }
    })
    .with_max_wait(FOREVER)
    .with_max_items(usize::MAX)
    .build()
    .unwrap();

    let res1 = agg.call(params![1, 2, 3]);
    let res2 = agg.call_with([4, 5, 6]);
    agg.flush().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Params::Multi(vec![1, 2, 3]), Params::Multi(vec![4, 5, 6])]
    );
    assert_eq!(res1.await.unwrap(), 1 + 2 + 3);
    assert_eq!(res2.await.unwrap(), 4 + 5 + 6);
}

#[tokio::test]
async fn test_zero_params() {
    let agg = Aggregator::builder(|inputs: Vec<Params<i32>>| async move {
        assert_eq!(inputs, vec![Params::None, Params::None]);
        Ok::<_, std::io::Error>(vec![3, 5])
    })
    .with_max_wait(FOREVER)
    .build()
    .unwrap();

    let res1 = agg.call(params![]);
    let res2 = agg.call_with(Vec::new());
    agg.flush().await.unwrap();

    assert_eq!(res1.await.unwrap(), 3);
    assert_eq!(res2.await.unwrap(), 5);
}

#[tokio::test]
async fn test_length_mismatch_rejects_every_call() {
    let invoked = Counter::default();
    let invoked_bulk = invoked.clone();
    let agg = Aggregator::builder(move |inputs: Vec<Params<i32>>| {
        invoked_bulk.bump();
        assert_eq!(inputs.len(), 3);
        async move { Ok::<_, std::io::Error>(vec![3, 5]) }
    })
    .with_max_wait(FOREVER)
    .build()
    .unwrap();

    let calls = vec![agg.call(params![]), agg.call(params![]), agg.call(params![])];
    let stats = agg.flush().await.unwrap();
    assert!(!stats.ok);
    assert_eq!(stats.count, 3);

    for call in calls {
        match call.await {
            Err(Error::LengthMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 2));
            }
            other => panic!("expected length mismatch, got {:?}", other),
        }
    }
    assert_eq!(invoked.get(), 1);
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let agg = Aggregator::builder(|inputs: Vec<String>| async move {
        Ok::<_, std::io::Error>(inputs.iter().map(|s| s.to_uppercase()).collect())
    })
    .with_max_wait(FOREVER)
    .with_max_items(usize::MAX)
    .build()
    .unwrap();

    let words = ["delta", "alpha", "charlie", "bravo", "echo"];
    let calls: Vec<_> = words.iter().map(|w| agg.call(w.to_string())).collect();
    agg.flush().await.unwrap();

    for (word, call) in words.iter().zip(calls) {
        assert_eq!(call.await.unwrap(), word.to_uppercase());
    }
}

#[tokio::test]
async fn test_empty_flush_invokes_bulk_with_empty_batch() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let batches_bulk = Arc::clone(&batches);
    let agg = Aggregator::builder(move |inputs: Vec<i32>| {
        batches_bulk.lock().unwrap().push(inputs.len());
        async move { Ok::<_, std::io::Error>(inputs) }
    })
    .build()
    .unwrap();

    let stats = agg.flush().await.unwrap();
    assert!(stats.ok);
    assert_eq!(stats.count, 0);
    assert_eq!(*batches.lock().unwrap(), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_spares_inflight_batch() {
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
    let agg = Aggregator::builder(move |inputs: Vec<i32>| {
        let release_rx = Arc::clone(&release_rx);
        async move {
            if let Some(rx) = release_rx.lock().await.take() {
                let _ = rx.await;
            }
            Ok::<_, std::io::Error>(inputs)
        }
    })
    .with_max_wait(FOREVER)
    .with_max_items(2)
    .build()
    .unwrap();

    // Size-triggered batch, blocked inside the bulk operation.
    let first = agg.call(1);
    let second = agg.call(2);
    tokio::task::yield_now().await;
    assert_eq!(agg.snapshot().state, aggregate_fn::AggregatorState::Draining);

    // Only the next queue is discarded.
    let third = agg.call(3);
    assert_eq!(agg.cancel(), 1);
    assert!(third.await.unwrap_err().is_cancelled());

    release_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_bulk_invocation_in_flight() {
    let active = Counter::default();
    let peak = Counter::default();
    let (active_bulk, peak_bulk) = (active.clone(), peak.clone());
    let agg = Aggregator::builder(move |inputs: Vec<i32>| {
        let active = active_bulk.clone();
        let peak = peak_bulk.clone();
        async move {
            active.bump();
            peak.0.fetch_max(active.get(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            active.0.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(inputs)
        }
    })
    .with_max_wait(FOREVER)
    .with_max_items(2)
    .build()
    .unwrap();

    let calls: Vec<_> = (0..6).map(|i| agg.call(i)).collect();
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap(), i as i32);
    }
    assert_eq!(peak.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_usable_after_failure_and_cancel() {
    let fail_next = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let fail_bulk = Arc::clone(&fail_next);
    let agg = Aggregator::builder(move |inputs: Vec<i32>| {
        let fail = fail_bulk.swap(false, Ordering::SeqCst);
        async move {
            if fail {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "transient"))
            } else {
                Ok(inputs)
            }
        }
    })
    .with_max_wait(Duration::from_millis(10))
    .build()
    .unwrap();

    assert!(agg.call(1).await.unwrap_err().is_bulk_failure());

    let cancelled = agg.call(2);
    agg.cancel();
    assert!(cancelled.await.unwrap_err().is_cancelled());

    assert_eq!(agg.call(3).await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_clones_share_one_queue() {
    let counter = Counter::default();
    let agg = doubling(&counter, FOREVER, 2);
    let other = agg.clone();

    let a = agg.call(10);
    assert_eq!(other.pending(), 1);
    let b = other.call(20);

    assert_eq!(a.await.unwrap(), 20);
    assert_eq!(b.await.unwrap(), 40);
    assert_eq!(counter.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queued_calls_survive_dropped_handle() {
    let counter = Counter::default();
    let agg = doubling(&counter, Duration::from_millis(20), 10);

    let pending = agg.call(21);
    drop(agg);

    assert_eq!(pending.await.unwrap(), 42);
    assert_eq!(counter.get(), 1);
}
