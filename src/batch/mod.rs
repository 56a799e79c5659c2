//! 请求聚合模块：把单次调用透明地合并为批量调用。
//!
//! # Request Aggregation Module
//!
//! This module turns a bulk operation (N inputs in, N outputs out) into a
//! per-call function. Individual calls are queued and dispatched together,
//! so one bulk invocation replaces N single ones.
//!
//! ## Flush Triggers
//!
//! - **Size**: the queue reaches `max_items`; the batch is dispatched at once
//! - **Time**: `max_wait` elapsed since the first call of the batch
//! - **Manual**: [`Aggregator::flush`]
//!
//! [`Aggregator::cancel`] rejects every queued call with
//! [`Error::Cancelled`](crate::Error::Cancelled) instead.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Aggregator`] | Queue, timer and dispatch for one bulk operation |
//! | [`AggregatorBuilder`] | Builder wiring the operation, config and stats sink |
//! | [`AggregatorConfig`] | `max_wait` / `max_items` thresholds |
//! | [`CallFuture`] | Result of one aggregated call |
//! | [`Params`] | Normalized variadic arguments |
//! | [`AggregatorSnapshot`] | Point-in-time state for observability |
//!
//! ## Example
//!
//! ```rust
//! use aggregate_fn::batch::{aggregate, AggregatorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> aggregate_fn::Result<()> {
//! let config = AggregatorConfig::new().with_max_items(3).with_max_wait_ms(200);
//! let lengths = aggregate(
//!     |words: Vec<String>| async move {
//!         Ok::<_, std::io::Error>(words.iter().map(|w| w.len()).collect())
//!     },
//!     config,
//! )?;
//!
//! let pending = lengths.call("hello".to_string());
//! lengths.flush().await?;
//! assert_eq!(pending.await?, 5);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod collector;
mod config;
mod params;

pub use aggregator::{
    aggregate, Aggregator, AggregatorBuilder, AggregatorSnapshot, AggregatorState, CallFuture,
};
pub use config::{AggregatorConfig, DEFAULT_MAX_ITEMS, DEFAULT_MAX_WAIT};
pub use params::Params;
