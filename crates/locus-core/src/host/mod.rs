//! HTTP service host.
//!
//! Serves one capability over the JSON interface the network proxy speaks:
//!
//! - `POST /ask`, `POST /tell`, `POST /do` → `{ "result": ... }`
//! - failures → non-2xx with `{ "error": "..." }`
//! - `GET /health` → `{ "status": "ok" }`
//! - `GET /` → capability and protocol version
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime; axum handles each connection in its
//! own task. The hosted service is shared via `Arc` and must synchronize
//! internally.

use crate::config::AppConfig;
use crate::discovery::Endpoint;
use crate::network::wire::{
    AskRequest, DoRequest, ErrorResponse, HealthResponse, HostInfo, ResultResponse, TellRequest,
};
use crate::service::{Invocation, Method, SharedService};
use crate::{LocusError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

struct HostState {
    capability: String,
    service: SharedService,
}

/// Error reply with the status [`LocusError::http_status`] picks.
struct HostError(LocusError);

impl From<LocusError> for HostError {
    fn from(err: LocusError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for HostError {
    fn from(rejection: JsonRejection) -> Self {
        Self(LocusError::Json {
            message: rejection.body_text(),
            source: None,
        })
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Relay a peer's message as-is rather than nesting it.
        let error = match self.0 {
            LocusError::Remote { message, .. } => message,
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

type HostResult = std::result::Result<Json<ResultResponse<Value>>, HostError>;

async fn invoke(state: &HostState, invocation: Invocation) -> HostResult {
    let method = invocation.method();
    match invocation.dispatch(state.service.as_ref()).await {
        Ok(result) => Ok(Json(ResultResponse { result })),
        Err(e) => {
            debug!(capability = %state.capability, "{} failed: {}", method, e);
            Err(e.into())
        }
    }
}

async fn handle_ask(
    State(state): State<Arc<HostState>>,
    body: std::result::Result<Json<AskRequest>, JsonRejection>,
) -> HostResult {
    let Json(request) = body?;
    invoke(&state, request.into()).await
}

async fn handle_tell(
    State(state): State<Arc<HostState>>,
    body: std::result::Result<Json<TellRequest>, JsonRejection>,
) -> HostResult {
    let Json(request) = body?;
    invoke(&state, request.into()).await
}

async fn handle_do(
    State(state): State<Arc<HostState>>,
    body: std::result::Result<Json<DoRequest>, JsonRejection>,
) -> HostResult {
    let Json(request) = body?;
    invoke(&state, request.into()).await
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn handle_info(State(state): State<Arc<HostState>>) -> Json<HostInfo> {
    Json(HostInfo {
        capability: state.capability.clone(),
        protocol_version: AppConfig::PROTOCOL_VERSION,
        endpoints: Method::ALL
            .iter()
            .map(|m| crate::network::wire::path_for(*m).to_string())
            .collect(),
    })
}

/// Handle to a running host. Dropping shuts it down.
pub struct ServiceHostHandle {
    pub addr: SocketAddr,
    pub port: u16,
    capability: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServiceHostHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Endpoint to advertise, using `host` as the reachable address.
    pub fn endpoint(&self, host: &str) -> Endpoint {
        Endpoint::new(host, self.port)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ServiceHostHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Serves one capability over HTTP.
pub struct ServiceHost;

impl ServiceHost {
    pub fn router(capability: impl Into<String>, service: SharedService) -> Router {
        let state = Arc::new(HostState {
            capability: capability.into(),
            service,
        });
        Router::new()
            .route("/", get(handle_info))
            .route("/health", get(handle_health))
            .route("/ask", post(handle_ask))
            .route("/tell", post(handle_tell))
            .route("/do", post(handle_do))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `addr` (port 0 picks one) and serve in the background.
    pub async fn start(
        capability: impl Into<String>,
        service: SharedService,
        addr: SocketAddr,
    ) -> Result<ServiceHostHandle> {
        let capability = capability.into();
        let listener = TcpListener::bind(addr).await.map_err(|e| LocusError::Io {
            message: format!("Failed to bind service host on {}: {}", addr, e),
            path: None,
            source: Some(e),
        })?;
        let local_addr = listener.local_addr()?;
        let app = Self::router(capability.clone(), service);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let name = capability.clone();
        let task_handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(capability = %name, "Service host failed: {}", e);
            }
        });

        info!(capability = %capability, "Serving on {}", local_addr);
        Ok(ServiceHostHandle {
            addr: local_addr,
            port: local_addr.port(),
            capability,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Kwargs, Service};
    use serde_json::json;

    struct Upper;

    #[async_trait::async_trait]
    impl Service for Upper {
        async fn ask(&self, query: Value, _kwargs: Kwargs) -> Result<Value> {
            Ok(Value::String(crate::service::query_text(&query).to_uppercase()))
        }
        async fn tell(&self, format: &str, data: Value, _kwargs: Kwargs) -> Result<String> {
            Ok(format!("{}:{}", format, data))
        }
        async fn perform(&self, action: &str, _kwargs: Kwargs) -> Result<Value> {
            Err(LocusError::UnknownIntent {
                capability: "upper".into(),
                input: action.into(),
            })
        }
    }

    async fn start_upper() -> ServiceHostHandle {
        ServiceHost::start("upper", Arc::new(Upper), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_host_routes() {
        let host = start_upper().await;
        let base = format!("http://{}", host.addr());
        let client = reqwest::Client::new();

        let info: HostInfo = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(info.capability, "upper");
        assert_eq!(info.endpoints, vec!["/ask", "/tell", "/do"]);

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health, json!({ "status": "ok" }));

        let reply: Value = client
            .post(format!("{}/ask", base))
            .json(&json!({ "query": "ping" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply, json!({ "result": "PING" }));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_errors_are_json() {
        let host = start_upper().await;
        let base = format!("http://{}", host.addr());
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/do", base))
            .json(&json!({ "action": "explode" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 422);
        let body: ErrorResponse = response.json().await.unwrap();
        assert!(body.error.contains("explode"));

        let response = client
            .post(format!("{}/ask", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: ErrorResponse = response.json().await.unwrap();
        assert!(!body.error.is_empty());
    }
}
