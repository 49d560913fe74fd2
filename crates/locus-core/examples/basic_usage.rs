//! Basic usage example - register a capability and read it through the cache

use async_trait::async_trait;
use locus_core::{CachedLocator, Kwargs, Result, Service};
use serde_json::{json, Value};

struct Greeter;

#[async_trait]
impl Service for Greeter {
    async fn ask(&self, query: Value, _kwargs: Kwargs) -> Result<Value> {
        println!("  (greeter called)");
        Ok(json!(format!("hello, {}", query.as_str().unwrap_or("stranger"))))
    }

    async fn tell(&self, _format: &str, data: Value, _kwargs: Kwargs) -> Result<String> {
        Ok(data.to_string())
    }

    async fn perform(&self, action: &str, _kwargs: Kwargs) -> Result<Value> {
        Ok(json!({ "done": action }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Get cache path from args or use a temp file
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| std::env::temp_dir().join("locus-example.sqlite").display().to_string());

    println!("Opening cache at {}", db_path);
    let locator = CachedLocator::builder().db_path(&db_path).build()?;
    locator
        .registry()
        .register("greeter", std::sync::Arc::new(Greeter));

    let greeter = locator.get_service("greeter", false)?;
    for _ in 0..3 {
        let reply = greeter.ask(json!("world"), Kwargs::new()).await?;
        println!("ask -> {}", reply);
    }

    greeter.perform("refresh", Kwargs::new()).await?;
    println!("ask after do -> {}", greeter.ask(json!("world"), Kwargs::new()).await?);

    let stats = locator.stats().await?;
    println!(
        "RAM hits: {}, DB hits: {}, misses: {}, hit rate: {:.2}",
        stats.ram_hits, stats.db_hits, stats.db_misses, stats.hit_rate
    );

    Ok(())
}
