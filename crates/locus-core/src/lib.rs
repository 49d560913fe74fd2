//! Locus Core - capability-based service locator with hybrid caching.
//!
//! Callers ask for a capability by name ("database", "echo") and get back a
//! handle that speaks three verbs: `ask`, `tell` and `do`. The handle is
//! either the in-process implementation or a proxy to a remote node found
//! through discovery, and reads through a two-tier RAM + SQLite cache.
//!
//! # Layers
//!
//! - [`registry`]: in-process services by capability.
//! - [`discovery`]: remote instances, via UDP multicast or injected
//!   descriptors.
//! - [`locator`]: local-or-remote resolution with a short resolution cache.
//! - [`network`]: HTTP proxy with retry, deadline and circuit breaker.
//! - [`cache`]: sharded RAM LRU over a SQLite store, plus caching policy.
//! - [`cached`]: the locator wrapped with read-through caching and an admin
//!   surface.
//! - [`host`]: serves a capability over HTTP for remote proxies.
//!
//! # Example
//!
//! ```rust,ignore
//! use locus_core::{CachedLocator, Service};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> locus_core::Result<()> {
//!     let locator = CachedLocator::builder()
//!         .db_path("/tmp/locus-cache.sqlite")
//!         .build()?;
//!     locator.registry().register("echo", std::sync::Arc::new(MyEcho::default()));
//!
//!     let echo = locator.get_service("echo", false)?;
//!     let reply = echo.ask(json!("ping"), Default::default()).await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cached;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod intent;
pub mod locator;
pub mod network;
pub mod registry;
pub mod service;
pub mod tasks;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheKey, CachePolicy, CacheStats, HybridCache, InvalidationScope,
    PersistentStore, PolicyTable, SqliteStore, TierPresence,
};
pub use cached::{CachedLocator, CachedLocatorBuilder, CachedService, LocatorAdmin, ADMIN_CAPABILITY};
pub use config::{DiscoveryMode, LocusConfig};
pub use discovery::{
    Discovery, Endpoint, Health, LocalOnlyDiscovery, MulticastConfig, NetworkDiscovery,
    ServiceDescriptor, Transport,
};
pub use error::{LocusError, Result};
pub use host::{ServiceHost, ServiceHostHandle};
pub use intent::IntentTable;
pub use locator::{LocatedService, Origin, ServiceLocator};
pub use network::{CallOptions, CircuitBreaker, CircuitState, NetworkProxy, RetryConfig};
pub use registry::LocalRegistry;
pub use service::{Invocation, Kwargs, Method, Service, SharedService};
pub use tasks::TaskHandle;
