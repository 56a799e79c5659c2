//! Reusable stats sinks.

use super::{BatchStats, StatsSink};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// In-memory sink for testing.
pub struct InMemoryStatsSink {
    records: Arc<RwLock<VecDeque<BatchStats>>>,
    max_records: usize,
}

impl InMemoryStatsSink {
    pub fn new(max: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            max_records: max,
        }
    }

    pub fn records(&self) -> Vec<BatchStats> {
        self.records.read().unwrap().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<BatchStats> {
        self.records.read().unwrap().back().cloned()
    }

    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from_records(self.records.read().unwrap().iter())
    }
}

impl Default for InMemoryStatsSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl StatsSink for InMemoryStatsSink {
    async fn report(&self, stats: BatchStats) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.push_back(stats);
        if records.len() > self.max_records {
            records.pop_front();
        }
        Ok(())
    }
}

/// Aggregate view over a set of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSummary {
    pub flushes: usize,
    pub failures: usize,
    pub total_calls: usize,
    pub max_delay_ms: u64,
}

impl StatsSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a BatchStats>) -> Self {
        records
            .into_iter()
            .fold(StatsSummary::default(), |mut acc, r| {
                acc.flushes += 1;
                if !r.ok {
                    acc.failures += 1;
                }
                acc.total_calls += r.count;
                acc.max_delay_ms = acc.max_delay_ms.max(r.delay);
                acc
            })
    }

    pub fn mean_batch_size(&self) -> f64 {
        if self.flushes == 0 {
            0.0
        } else {
            self.total_calls as f64 / self.flushes as f64
        }
    }
}

/// Logs every record at `info` level.
pub struct TracingStatsSink {
    name: String,
}

impl TracingStatsSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for TracingStatsSink {
    fn default() -> Self {
        Self::new("aggregate")
    }
}

#[async_trait]
impl StatsSink for TracingStatsSink {
    async fn report(&self, stats: BatchStats) -> Result<()> {
        tracing::info!(
            aggregator = %self.name,
            ok = stats.ok,
            count = stats.count,
            swarf = stats.swarf,
            delay_ms = stats.delay,
            "batch flushed"
        );
        Ok(())
    }
}

/// Composite sink for multiple destinations.
pub struct CompositeStatsSink {
    sinks: Vec<Arc<dyn StatsSink>>,
}

impl CompositeStatsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for CompositeStatsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsSink for CompositeStatsSink {
    async fn report(&self, stats: BatchStats) -> Result<()> {
        for s in &self.sinks {
            if let Err(e) = s.report(stats.clone()).await {
                tracing::warn!(error = %e, "stats sink failed");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
