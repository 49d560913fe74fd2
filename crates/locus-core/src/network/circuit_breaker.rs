//! Per-descriptor circuit breaker.
//!
//! - CLOSED: calls flow through.
//! - OPEN: the endpoint is skipped by resolution until the cooldown passes.
//! - HALF_OPEN: exactly one probe call is admitted; its outcome closes or
//!   reopens the circuit.
//!
//! Only connectivity failures count. A peer that answers with an application
//! error is alive and records a success.

use crate::config::NetworkConfig;
use crate::discovery::Health;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// How [`CircuitBreaker::admit`] let a call through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    /// Normal call on a closed circuit.
    Call,
    /// The single half-open probe. Its outcome must be recorded, or the
    /// endpoint stays unavailable.
    Probe,
}

/// Thresholds for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit is skipped before the half-open probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: NetworkConfig::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            cooldown: NetworkConfig::CIRCUIT_BREAKER_RECOVERY_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding one remote endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    endpoint: String,
    inner: Mutex<BreakerState>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(endpoint, CircuitBreakerConfig::default())
    }

    pub fn with_config(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            endpoint: endpoint.into(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current state, promoting OPEN to HALF_OPEN once the cooldown passed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner, Instant::now());
        inner.state
    }

    /// Health reported for the descriptor this breaker guards.
    pub fn health(&self) -> Health {
        match self.state() {
            CircuitState::Closed => Health::Healthy,
            CircuitState::Open | CircuitState::HalfOpen => Health::Degraded,
        }
    }

    /// Whether resolution may hand out this endpoint. Does not consume the
    /// half-open probe.
    pub fn is_available(&self) -> bool {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Admit a call. In HALF_OPEN only the first caller gets through.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => Admission::Call,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    debug!("Admitting half-open probe to {}", self.endpoint);
                    Admission::Probe
                }
            }
        }
    }

    pub fn allow_request(&self) -> bool {
        self.admit() != Admission::Rejected
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!("Circuit for {} recovered to CLOSED", self.endpoint);
        }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;

        let reopen = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if reopen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                "Circuit for {} OPEN after {} consecutive failures",
                self.endpoint, inner.consecutive_failures
            );
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state();
        let inner = self.inner.lock();
        CircuitBreakerStats {
            endpoint: self.endpoint.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            open_for: inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
        }
    }

    fn promote_if_cooled(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map(|opened| now.saturating_duration_since(opened) >= self.config.cooldown)
            .unwrap_or(true);
        if cooled {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            debug!("Circuit for {} entering HALF_OPEN", self.endpoint);
        }
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub endpoint: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub open_for: Duration,
}
