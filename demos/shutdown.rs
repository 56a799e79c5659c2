//! Shutdown Handling Example
//!
//! Callers trickle in slower than `max_wait` would ever fill a batch. Press
//! Ctrl-C to flush whatever is queued right away; anything enqueued after
//! that is cancelled on the way out.
//!
//! Usage:
//!   cargo run --example shutdown

use aggregate_fn::{params, Aggregator, AggregatorConfig, Params};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    // Each call carries (base, exponent).
    let power = Aggregator::builder(|calls: Vec<Params<u32>>| async move {
        calls
            .into_iter()
            .map(|p| match p.into_vec().as_slice() {
                [base, exp] => Ok(base.pow(*exp)),
                other => Err(anyhow::anyhow!("expected (base, exponent), got {:?}", other)),
            })
            .collect::<anyhow::Result<Vec<u32>>>()
    })
    .with_config(AggregatorConfig::new().with_max_wait(Duration::from_secs(30)).with_max_items(100))
    .with_stats(|stats| println!("Stats: {}", serde_json::to_string(&stats).unwrap_or_default()))
    .build()?;

    let producer = {
        let power = power.clone();
        tokio::spawn(async move {
            for base in 1..=60_000u32 {
                let call = power.call(params![base, 2]);
                tokio::spawn(async move {
                    match call.await {
                        Ok(v) => println!("{}^2 = {}", base, v),
                        Err(e) => println!("{}^2 failed: {}", base, e),
                    }
                });
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    let stats = power.flush().await?;
    println!("Flushed {} queued calls", stats.count);

    producer.abort();
    let discarded = power.cancel();
    println!("Cancelled {} calls", discarded);
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
