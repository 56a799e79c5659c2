//! # aggregate-fn
//!
//! 通用请求聚合器：把独立的异步调用收集成批，一次性交给批量操作处理。
//!
//! Transparently aggregate individual async calls into batched invocations of
//! a bulk operation.
//!
//! ## Overview
//!
//! Many backends accept a batch of inputs far more cheaply than the same
//! inputs one by one: one HTTP request instead of N, one database round trip
//! instead of N. This crate wraps such a bulk operation and hands out a
//! per-call front end. Calls are queued and dispatched together when the
//! batch is full, when the oldest call has waited long enough, or when the
//! caller asks for a flush.
//!
//! ## Guarantees
//!
//! - Every call is settled exactly once, by a flush or a cancel
//! - Inputs reach the bulk operation in call order, and outputs are matched
//!   back by position
//! - One bulk invocation in flight per aggregator
//! - A failed batch fails all of its calls; the aggregator stays usable
//!
//! ## Quick Start
//!
//! ```rust
//! use aggregate_fn::{aggregate, AggregatorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> aggregate_fn::Result<()> {
//! let doubler = aggregate(
//!     |inputs: Vec<i64>| async move {
//!         Ok::<_, std::io::Error>(inputs.into_iter().map(|n| n * 2).collect())
//!     },
//!     AggregatorConfig::new().with_max_items(3),
//! )?;
//!
//! let (a, b, c) = tokio::join!(doubler.call(1), doubler.call(2), doubler.call(3));
//! assert_eq!((a?, b?, c?), (2, 4, 6));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Aggregator, configuration and argument normalization |
//! | [`stats`] | Per-flush statistics and sinks |
//! | [`error`] | Error type settled into calls |

pub mod batch;
pub mod stats;

// Re-export main types for convenience
pub use batch::{
    aggregate, Aggregator, AggregatorBuilder, AggregatorConfig, AggregatorSnapshot,
    AggregatorState, CallFuture, Params,
};
pub use stats::{BatchStats, StatsSink};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BulkError, Error, ErrorContext};
