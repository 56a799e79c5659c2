//! 批次统计模块：每次 flush 产生一条统计记录，并交给可插拔的 sink。
//!
//! # Flush Statistics
//!
//! Every flush of an [`Aggregator`](crate::batch::Aggregator) produces exactly
//! one [`BatchStats`] record, including flushes of an empty queue. Records are
//! handed to an optional [`StatsSink`] after every call of the batch has been
//! settled, so a slow or failing sink never delays or changes a result.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchStats`] | Record emitted once per flush |
//! | [`StatsSink`] | Trait for stats destinations |
//! | [`FnStatsSink`] | Adapts a plain callback |
//! | [`InMemoryStatsSink`] | Bounded in-memory sink for testing |
//! | [`TracingStatsSink`] | Logs each record through `tracing` |
//! | [`CompositeStatsSink`] | Multi-destination composite sink |

mod sinks;

pub use sinks::{CompositeStatsSink, InMemoryStatsSink, StatsSummary, TracingStatsSink};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// The bulk operation succeeded and returned one result per call.
    pub ok: bool,
    /// Number of calls in the batch.
    pub count: usize,
    /// Unused capacity, `max_items - count`.
    pub swarf: usize,
    /// Milliseconds from the oldest call's enqueue until its batch was
    /// settled. Zero for an empty batch.
    pub delay: u64,
}

impl BatchStats {
    pub fn new(ok: bool, count: usize, max_items: usize, delay: u64) -> Self {
        Self {
            ok,
            count,
            swarf: max_items.saturating_sub(count),
            delay,
        }
    }

    /// Fill ratio of the batch in `[0, 1]`.
    pub fn fill_ratio(&self) -> f64 {
        let capacity = self.count + self.swarf;
        if capacity == 0 {
            0.0
        } else {
            self.count as f64 / capacity as f64
        }
    }
}

/// Destination for flush statistics.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn report(&self, stats: BatchStats) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink backed by a plain callback.
pub struct FnStatsSink<F> {
    f: F,
}

impl<F> FnStatsSink<F>
where
    F: Fn(BatchStats) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> StatsSink for FnStatsSink<F>
where
    F: Fn(BatchStats) + Send + Sync + 'static,
{
    async fn report(&self, stats: BatchStats) -> Result<()> {
        (self.f)(stats);
        Ok(())
    }
}

/// Shorthand for [`FnStatsSink::new`].
pub fn stats_fn<F>(f: F) -> FnStatsSink<F>
where
    F: Fn(BatchStats) + Send + Sync,
{
    FnStatsSink::new(f)
}
