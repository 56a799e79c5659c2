//! Simple Aggregation Example
//!
//! Four concurrent callers share one doubling bulk operation. With
//! `max_items = 2` the first two calls go out together as soon as the second
//! arrives, the third waits for the 200 ms timer, and the fourth, issued
//! later, forms a batch of its own.
//!
//! Usage:
//!   RUST_LOG=aggregate_fn=debug cargo run --example simple

use aggregate_fn::stats::TracingStatsSink;
use aggregate_fn::{Aggregator, AggregatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let doubler = Aggregator::builder(|requests: Vec<u64>| async move {
        Ok::<_, std::io::Error>(requests.into_iter().map(|r| r * 2).collect())
    })
    .with_config(AggregatorConfig::new().with_max_wait_ms(200).with_max_items(2))
    .with_stats_sink(Arc::new(TracingStatsSink::new("simple")))
    .build()?;

    let mut tasks = Vec::new();
    for request in 1..=4u64 {
        let doubler = doubler.clone();
        tasks.push(tokio::spawn(async move {
            if request == 4 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let response = doubler.call(request).await?;
            println!("Request #{}: {}", request, response);
            Ok::<_, aggregate_fn::Error>(())
        }));
    }

    for task in tasks {
        task.await??;
    }
    Ok(())
}
