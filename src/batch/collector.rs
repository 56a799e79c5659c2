//! Pending-call queue and timer slot.

use crate::{Error, Result};
use std::mem;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One call awaiting settlement.
pub(crate) struct PendingCall<I, O> {
    pub input: I,
    pub enqueued_at: Instant,
    settle: oneshot::Sender<Result<O>>,
}

impl<I, O> PendingCall<I, O> {
    pub fn new(input: I) -> (Self, oneshot::Receiver<Result<O>>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            input,
            enqueued_at: Instant::now(),
            settle: tx,
        };
        (call, rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddResult {
    Added { count: usize },
    ShouldFlush { count: usize },
}

impl AddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, AddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            AddResult::Added { count } | AddResult::ShouldFlush { count } => *count,
        }
    }
}

struct ArmedTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// Queue of pending calls plus the single scheduled-flush timer.
///
/// Lives behind the aggregator's mutex; nothing here awaits or runs user code.
pub(crate) struct BatchCollector<I, O> {
    max_items: usize,
    queue: Vec<PendingCall<I, O>>,
    timer: Option<ArmedTimer>,
    next_timer_id: u64,
}

impl<I, O> BatchCollector<I, O> {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            queue: Vec::new(),
            timer: None,
            next_timer_id: 0,
        }
    }

    pub fn add(&mut self, call: PendingCall<I, O>) -> AddResult {
        self.queue.push(call);
        let count = self.queue.len();
        if count >= self.max_items {
            AddResult::ShouldFlush { count }
        } else {
            AddResult::Added { count }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Reserve an id for a timer about to be spawned.
    pub fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id = self.next_timer_id.wrapping_add(1);
        self.next_timer_id
    }

    pub fn arm_timer(&mut self, id: u64, handle: JoinHandle<()>) {
        debug_assert!(self.timer.is_none());
        self.timer = Some(ArmedTimer { id, handle });
    }

    /// Detach the whole queue and abort the armed timer, if any.
    pub fn drain(&mut self) -> Batch<I, O> {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
        Batch::new(mem::take(&mut self.queue))
    }

    /// Detach on behalf of the timer task `id`.
    ///
    /// Returns `None` when the slot was already released by a size-triggered,
    /// manual or cancelling drain, so a stale timer never flushes a queue it
    /// was not armed for. The caller is the timer task itself, so its handle
    /// is released without aborting.
    pub fn drain_for_timer(&mut self, id: u64) -> Option<Batch<I, O>> {
        if self.timer.as_ref().map(|t| t.id) != Some(id) {
            return None;
        }
        self.timer = None;
        Some(Batch::new(mem::take(&mut self.queue)))
    }
}

/// Calls detached together for one bulk invocation.
pub(crate) struct Batch<I, O> {
    calls: Vec<PendingCall<I, O>>,
}

impl<I, O> Batch<I, O> {
    fn new(calls: Vec<PendingCall<I, O>>) -> Self {
        Self { calls }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Enqueue time of the first call; `None` when empty.
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.calls.first().map(|c| c.enqueued_at)
    }

    /// Split into the ordered inputs and their settlement handles.
    pub fn into_parts(self) -> (Vec<I>, Settlements<O>) {
        let (inputs, senders): (Vec<I>, Vec<_>) =
            self.calls.into_iter().map(|c| (c.input, c.settle)).unzip();
        (inputs, Settlements { senders })
    }

    pub fn reject_all(self, err: Error) {
        let (_, settlements) = self.into_parts();
        settlements.reject_all(err);
    }
}

/// Settlement handles of a batch, in enqueue order.
pub(crate) struct Settlements<O> {
    senders: Vec<oneshot::Sender<Result<O>>>,
}

impl<O> Settlements<O> {
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Resolve slot by slot, or reject everyone with the failure.
    ///
    /// `outputs` must already have been checked against `len()`. A caller
    /// that dropped its future is skipped.
    pub fn settle(self, outcome: Result<Vec<O>>) -> bool {
        match outcome {
            Ok(outputs) => {
                for (tx, out) in self.senders.into_iter().zip(outputs) {
                    let _ = tx.send(Ok(out));
                }
                true
            }
            Err(err) => {
                self.reject_all(err);
                false
            }
        }
    }

    pub fn reject_all(self, err: Error) {
        for tx in self.senders {
            let _ = tx.send(Err(err.clone()));
        }
    }
}
