//! Network transport for remote capabilities.
//!
//! This module provides:
//! - The network proxy that forwards `ask` / `tell` / `do` over HTTP
//! - Bounded retry with exponential backoff
//! - A per-descriptor circuit breaker
//! - The JSON bodies exchanged with service hosts

mod circuit_breaker;
mod proxy;
mod retry;
pub mod wire;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use proxy::{build_client, CallOptions, NetworkProxy, ProxySettings};
pub use retry::{retry_async, RetryConfig, RetryStats};
