//! Pool and pipeline walkthrough for redis-keeper
//!
//! Run against a local server:
//!
//! ```text
//! RUST_LOG=redis_keeper=debug cargo run --example pipeline_usage
//! ```

use redis_keeper::{Client, ConnectionConfig, PoolConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = ConnectionConfig::new(url).with_pool_config(
        PoolConfig::default()
            .with_max_active(8)
            .with_max_idle(4)
            .with_idle_timeout(Duration::from_secs(300))
            .with_wait_timeout(Duration::from_millis(500)),
    );

    let client = Client::new(config).await?;
    println!("Connected: {}", client.ping().await?);

    client.set("example:greeting", "hello").await?;
    println!("GET example:greeting = {}", client.get("example:greeting").await?);

    match client.get("example:missing").await {
        Ok(value) => println!("unexpected value: {value}"),
        Err(e) if client.is_nil(&e) => println!("example:missing is not set"),
        Err(e) => return Err(e.into()),
    }

    // Batch several commands into one round-trip.
    let pipeline = client.pipeline(3, 4);
    pipeline.incr("example:visits");
    pipeline.incr_by("example:visits", 10);
    pipeline.expire("example:visits", 60);
    pipeline.add_raw_cmd("INCR", ["example:greeting"]);

    let batch = pipeline.exec().await?;
    for (index, result) in batch.results.iter().enumerate() {
        match &result.outcome {
            Ok(value) => println!("[{index}] {:?} -> {value:?}", result.command),
            Err(e) => println!("[{index}] {:?} failed: {e}", result.command),
        }
    }
    if let Some(index) = batch.first_error {
        println!("first failing command: {index}");
    }

    let stats = client.stats();
    println!(
        "pool: active={} idle={} created={} reused={}",
        stats.active, stats.idle, stats.created, stats.reused
    );

    client.delete(["example:greeting", "example:visits"]).await?;
    client.close();
    Ok(())
}
