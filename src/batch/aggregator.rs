//! Aggregator: per-call front end over a bulk operation.

use super::collector::{Batch, BatchCollector, PendingCall};
use super::config::AggregatorConfig;
use super::params::Params;
use crate::stats::{BatchStats, FnStatsSink, StatsSink};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

fn clamp_millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

type BulkFn<I, O> = dyn Fn(Vec<I>) -> BoxFuture<'static, Result<Vec<O>>> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Timer,
    Manual,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Manual => "manual",
        }
    }
}

/// Coarse lifecycle state of an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Empty queue, no timer armed, nothing in flight.
    Idle,
    /// Calls are queued and a flush is scheduled.
    Accumulating,
    /// At least one detached batch is waiting on the bulk operation.
    Draining,
}

/// Point-in-time view of an aggregator, facts only.
#[derive(Debug, Clone)]
pub struct AggregatorSnapshot {
    pub state: AggregatorState,
    pub pending: usize,
    pub timer_armed: bool,
    /// Detached batches not yet settled.
    pub inflight: usize,
    pub max_items: usize,
    pub max_wait_ms: u64,
}

struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner<I, O> {
    config: AggregatorConfig,
    bulk: Box<BulkFn<I, O>>,
    stats: Option<Arc<dyn StatsSink>>,
    state: Mutex<BatchCollector<I, O>>,
    /// Serializes bulk invocations: one in flight per aggregator.
    dispatch_gate: tokio::sync::Mutex<()>,
    inflight: Arc<AtomicUsize>,
}

impl<I, O> Inner<I, O> {
    fn lock_state(&self) -> MutexGuard<'_, BatchCollector<I, O>> {
        // The critical sections never panic, so a poisoned lock still holds a
        // consistent queue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(
        &self,
        batch: Batch<I, O>,
        trigger: FlushTrigger,
        _inflight: InflightGuard,
    ) -> BatchStats {
        let count = batch.len();
        let oldest = batch.oldest_enqueued_at();
        debug!(trigger = trigger.as_str(), count, "dispatching batch");

        let gate = self.dispatch_gate.lock().await;
        let (inputs, settlements) = batch.into_parts();
        let expected = settlements.len();
        let outcome = match (self.bulk)(inputs).await {
            Ok(outputs) if outputs.len() == expected => Ok(outputs),
            Ok(outputs) => Err(Error::LengthMismatch {
                expected,
                actual: outputs.len(),
            }),
            Err(err) => Err(err),
        };
        if let Err(ref err) = outcome {
            warn!(error = %err, count, "batch failed");
        }
        let ok = settlements.settle(outcome);
        drop(gate);

        // Covers time spent waiting on the gate and in the bulk operation.
        let delay = oldest
            .map(|t| clamp_millis(Instant::now().saturating_duration_since(t)))
            .unwrap_or(0);
        let stats = BatchStats::new(ok, count, self.config.max_items, delay);
        if let Some(sink) = &self.stats {
            if let Err(e) = sink.report(stats.clone()).await {
                warn!(error = %e, "stats sink failed");
            }
        }
        stats
    }
}

/// Collects individual calls into batches for a bulk operation.
///
/// A batch is dispatched when it reaches `max_items` calls, when `max_wait`
/// has elapsed since its first call, or on [`flush`](Self::flush). Each call
/// is settled from the output slot matching its position in the batch.
///
/// Cloning is cheap and every clone feeds the same queue. Queued calls are
/// still flushed by their timer after every handle has been dropped.
///
/// ```rust
/// use aggregate_fn::batch::{Aggregator, AggregatorConfig};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> aggregate_fn::Result<()> {
/// let doubler = Aggregator::builder(|inputs: Vec<u32>| async move {
///     Ok::<_, std::io::Error>(inputs.into_iter().map(|n| n * 2).collect())
/// })
/// .with_config(AggregatorConfig::new().with_max_items(2))
/// .with_max_wait(Duration::from_millis(50))
/// .build()?;
///
/// let (a, b) = tokio::join!(doubler.call(1), doubler.call(2));
/// assert_eq!((a?, b?), (2, 4));
/// # Ok(())
/// # }
/// ```
pub struct Aggregator<I, O> {
    inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for Aggregator<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> Aggregator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn builder<F, Fut, E>(bulk: F) -> AggregatorBuilder<I, O>
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<O>, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
    {
        AggregatorBuilder::new(bulk)
    }

    /// Enqueue one call and return a future for its result.
    ///
    /// Never blocks. The call joins the current batch; reaching `max_items`
    /// dispatches the batch right away, otherwise the first call of a batch
    /// schedules a flush `max_wait` later.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, which drives the flush
    /// timer and size-triggered dispatch.
    pub fn call(&self, input: I) -> CallFuture<O> {
        let (pending, rx) = PendingCall::new(input);
        let mut state = self.inner.lock_state();
        let added = state.add(pending);
        trace!(pending = added.count(), "call enqueued");

        if added.should_flush() {
            let batch = state.drain();
            let guard = InflightGuard::acquire(&self.inner.inflight);
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.dispatch(batch, FlushTrigger::Size, guard).await;
            });
        } else if !state.is_timer_armed() {
            self.arm_timer(&mut state);
        }
        CallFuture { rx }
    }

    fn arm_timer(&self, state: &mut BatchCollector<I, O>) {
        let id = state.next_timer_id();
        let wait = self.inner.config.max_wait;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let drained = inner
                .lock_state()
                .drain_for_timer(id)
                .map(|batch| (batch, InflightGuard::acquire(&inner.inflight)));
            if let Some((batch, guard)) = drained {
                inner.dispatch(batch, FlushTrigger::Timer, guard).await;
            }
        });
        state.arm_timer(id, handle);
    }

    /// Dispatch whatever is queued now and wait until it is settled.
    ///
    /// An empty queue still invokes the bulk operation, with an empty vector.
    /// Returns the stats record of this flush. Dropping the returned future
    /// does not abandon the batch.
    pub async fn flush(&self) -> Result<BatchStats> {
        let (batch, guard) = {
            let mut state = self.inner.lock_state();
            (state.drain(), InflightGuard::acquire(&self.inner.inflight))
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.dispatch(batch, FlushTrigger::Manual, guard).await })
            .await
            .map_err(|_| Error::Abandoned)
    }

    /// Reject every queued call with [`Error::Cancelled`] without invoking
    /// the bulk operation. Batches already dispatched are not affected.
    ///
    /// Returns the number of discarded calls.
    pub fn cancel(&self) -> usize {
        let batch = self.inner.lock_state().drain();
        if batch.is_empty() {
            return 0;
        }
        let discarded = batch.len();
        batch.reject_all(Error::Cancelled);
        debug!(discarded, "pending calls cancelled");
        discarded
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    pub fn pending(&self) -> usize {
        self.inner.lock_state().len()
    }

    pub fn is_idle(&self) -> bool {
        self.snapshot().state == AggregatorState::Idle
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        let (pending, timer_armed) = {
            let state = self.inner.lock_state();
            (state.len(), state.is_timer_armed())
        };
        let inflight = self.inner.inflight.load(Ordering::SeqCst);
        let state = if inflight > 0 {
            AggregatorState::Draining
        } else if pending > 0 {
            AggregatorState::Accumulating
        } else {
            AggregatorState::Idle
        };
        AggregatorSnapshot {
            state,
            pending,
            timer_armed,
            inflight,
            max_items: self.inner.config.max_items,
            max_wait_ms: clamp_millis(self.inner.config.max_wait),
        }
    }
}

impl<T, O> Aggregator<Params<T>, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    /// Normalize positional arguments into [`Params`] and enqueue them.
    pub fn call_with(&self, args: impl IntoIterator<Item = T>) -> CallFuture<O> {
        self.call(Params::from_args(args))
    }
}

impl<I, O> fmt::Debug for Aggregator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.inner.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Result of one aggregated call.
#[must_use = "dropping a CallFuture discards the result, the call is still dispatched"]
pub struct CallFuture<O> {
    rx: oneshot::Receiver<Result<O>>,
}

impl<O> Future for CallFuture<O> {
    type Output = Result<O>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(Error::Abandoned)))
    }
}

impl<O> fmt::Debug for CallFuture<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture").finish_non_exhaustive()
    }
}

/// Builder for [`Aggregator`].
pub struct AggregatorBuilder<I, O> {
    bulk: Box<BulkFn<I, O>>,
    config: AggregatorConfig,
    stats: Option<Arc<dyn StatsSink>>,
}

impl<I, O> AggregatorBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut, E>(bulk: F) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<O>, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
    {
        let bulk = move |inputs: Vec<I>| -> BoxFuture<'static, Result<Vec<O>>> {
            bulk(inputs).map(|r| r.map_err(Error::bulk)).boxed()
        };
        Self {
            bulk: Box::new(bulk),
            config: AggregatorConfig::default(),
            stats: None,
        }
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.config.max_items = max_items;
        self
    }

    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(sink);
        self
    }

    /// Report stats to a plain callback.
    pub fn with_stats<F>(self, f: F) -> Self
    where
        F: Fn(BatchStats) + Send + Sync + 'static,
    {
        self.with_stats_sink(Arc::new(FnStatsSink::new(f)))
    }

    pub fn build(self) -> Result<Aggregator<I, O>> {
        self.config.validate()?;
        let max_items = self.config.max_items;
        Ok(Aggregator {
            inner: Arc::new(Inner {
                config: self.config,
                bulk: self.bulk,
                stats: self.stats,
                state: Mutex::new(BatchCollector::new(max_items)),
                dispatch_gate: tokio::sync::Mutex::new(()),
                inflight: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }
}

/// Wrap `bulk` so that individual calls are aggregated per `config`.
pub fn aggregate<I, O, F, Fut, E>(bulk: F, config: AggregatorConfig) -> Result<Aggregator<I, O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<O>, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
{
    AggregatorBuilder::new(bulk).with_config(config).build()
}
