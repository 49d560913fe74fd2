//! Network proxy: a [`Service`] that forwards calls to a remote host.
//!
//! Each call POSTs JSON to `/ask`, `/tell` or `/do` under an explicit
//! deadline. Connection-level failures are retried on the backoff schedule;
//! application errors from a reachable peer are returned as `Remote` and
//! never retried. The outcome of each call feeds the descriptor's circuit
//! breaker.

use super::circuit_breaker::{Admission, CircuitBreaker};
use super::retry::{retry_async, RetryConfig};
use super::wire::{path_for, ErrorResponse, ResultResponse};
use crate::config::{AppConfig, LocusConfig, NetworkConfig};
use crate::discovery::{Endpoint, RemoteTarget};
use crate::service::{Invocation, Kwargs, Service};
use crate::{LocusError, Result};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the whole call, retries included.
    pub timeout: Option<Duration>,
    /// Skip retries for this call.
    pub no_retry: bool,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn no_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }
}

/// Proxy-wide settings shared by every proxy a locator creates.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: NetworkConfig::REQUEST_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl ProxySettings {
    pub fn from_config(config: &LocusConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            retry: RetryConfig::default()
                .with_max_attempts(config.network.max_attempts)
                .with_base_delay(Duration::from_millis(config.network.retry_base_delay_ms)),
        }
    }
}

/// Build the HTTP client proxies share.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(AppConfig::USER_AGENT)
        .build()
        .map_err(|e| LocusError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            cause: None,
        })
}

/// Forwards `ask` / `tell` / `do` to one remote endpoint.
#[derive(Debug, Clone)]
pub struct NetworkProxy {
    capability: String,
    endpoint: Endpoint,
    base_url: String,
    client: Client,
    settings: ProxySettings,
    breaker: Arc<CircuitBreaker>,
}

impl NetworkProxy {
    pub fn new(
        capability: impl Into<String>,
        endpoint: Endpoint,
        client: Client,
        breaker: Arc<CircuitBreaker>,
        settings: ProxySettings,
    ) -> Self {
        let base_url = endpoint.base_url();
        Self {
            capability: capability.into(),
            endpoint,
            base_url,
            client,
            settings,
            breaker,
        }
    }

    /// Proxy for a resolved remote target.
    pub fn for_target(target: &RemoteTarget, client: Client, settings: ProxySettings) -> Result<Self> {
        let endpoint = target.endpoint().cloned().ok_or_else(|| LocusError::Other(format!(
            "Descriptor for '{}' has no network endpoint",
            target.descriptor.capability
        )))?;
        Ok(Self::new(
            target.descriptor.capability.clone(),
            endpoint,
            client,
            target.breaker.clone(),
            settings,
        ))
    }

    /// Proxy with its own client and a fresh breaker.
    pub fn connect(capability: impl Into<String>, endpoint: Endpoint) -> Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new(endpoint.to_string()));
        Ok(Self::new(
            capability,
            endpoint,
            build_client()?,
            breaker,
            ProxySettings::default(),
        ))
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Issue one call, retried and bounded by the deadline.
    pub async fn call(&self, invocation: Invocation, options: &CallOptions) -> Result<Value> {
        let permit = match self.breaker.admit() {
            Admission::Rejected => {
                return Err(LocusError::CircuitBreakerOpen {
                    endpoint: self.endpoint.to_string(),
                })
            }
            admission => CallPermit::new(&self.breaker, admission),
        };

        let deadline = options.timeout.unwrap_or(self.settings.timeout);
        let retry = if options.no_retry {
            RetryConfig::none()
        } else {
            self.settings.retry.clone()
        };
        let url = format!("{}{}", self.base_url, path_for(invocation.method()));
        let body = invocation.args();

        let attempt = retry_async(
            &retry,
            || self.post_once(&url, &body, deadline),
            LocusError::is_retryable,
        );
        let result = match tokio::time::timeout(deadline, attempt).await {
            Ok((result, stats)) => {
                if stats.attempts > 1 {
                    debug!(
                        capability = %self.capability,
                        "{} took {} attempts",
                        url, stats.attempts
                    );
                }
                result
            }
            Err(_) => Err(LocusError::NetworkTimeout {
                endpoint: url.clone(),
                timeout: deadline,
            }),
        };

        match &result {
            Err(e) if e.is_connectivity() => {
                warn!(capability = %self.capability, "Call to {} failed: {}", url, e);
                permit.failure();
            }
            _ => permit.success(),
        }
        result
    }

    async fn post_once(&self, url: &str, body: &Value, timeout: Duration) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, url, timeout))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, url, timeout))?;

        if status.is_success() {
            let reply: ResultResponse<Value> = serde_json::from_slice(&bytes).map_err(|e| {
                LocusError::Json {
                    message: format!("Invalid reply from {}: {}", url, e),
                    source: Some(e),
                }
            })?;
            return Ok(reply.result);
        }

        let message = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|r| r.error)
            .unwrap_or_else(|_| {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text
                }
            });
        Err(LocusError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn ask_with(&self, query: Value, kwargs: Kwargs, options: &CallOptions) -> Result<Value> {
        self.call(Invocation::Ask { query, kwargs }, options).await
    }

    pub async fn tell_with(
        &self,
        format: &str,
        data: Value,
        kwargs: Kwargs,
        options: &CallOptions,
    ) -> Result<String> {
        let value = self
            .call(
                Invocation::Tell {
                    format: format.to_string(),
                    data,
                    kwargs,
                },
                options,
            )
            .await?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub async fn perform_with(&self, action: &str, kwargs: Kwargs, options: &CallOptions) -> Result<Value> {
        self.call(
            Invocation::Do {
                action: action.to_string(),
                kwargs,
            },
            options,
        )
        .await
    }
}

/// Outcome slot for one admitted call.
///
/// A half-open probe dropped before it settled (the caller gave up on the
/// future) counts as a failure and reopens the circuit.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            warn!("Half-open probe to {} abandoned", self.breaker.endpoint());
            self.breaker.record_failure();
        }
    }
}

fn transport_error(err: reqwest::Error, url: &str, timeout: Duration) -> LocusError {
    if err.is_timeout() {
        LocusError::NetworkTimeout {
            endpoint: url.to_string(),
            timeout,
        }
    } else {
        LocusError::Network {
            message: format!("POST {} failed: {}", url, err),
            cause: std::error::Error::source(&err).map(|s| s.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Service for NetworkProxy {
    async fn ask(&self, query: Value, kwargs: Kwargs) -> Result<Value> {
        self.ask_with(query, kwargs, &CallOptions::default()).await
    }

    async fn tell(&self, format: &str, data: Value, kwargs: Kwargs) -> Result<String> {
        self.tell_with(format, data, kwargs, &CallOptions::default())
            .await
    }

    async fn perform(&self, action: &str, kwargs: Kwargs) -> Result<Value> {
        self.perform_with(action, kwargs, &CallOptions::default())
            .await
    }
}
