//! HTTP bodies shared by the network proxy and the service host.

use crate::service::{Invocation, Kwargs, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: Value,
    #[serde(default)]
    pub kwargs: Kwargs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TellRequest {
    pub format: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub kwargs: Kwargs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoRequest {
    pub action: String,
    #[serde(default)]
    pub kwargs: Kwargs,
}

/// Successful reply: `{ "result": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse<T> {
    pub result: T,
}

/// Failed reply: `{ "error": "..." }` with a non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// `GET /` on a service host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub capability: String,
    pub protocol_version: u32,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// `GET /health` on a service host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Request path for a verb.
pub fn path_for(method: Method) -> &'static str {
    match method {
        Method::Ask => "/ask",
        Method::Tell => "/tell",
        Method::Do => "/do",
    }
}

impl From<AskRequest> for Invocation {
    fn from(req: AskRequest) -> Self {
        Invocation::Ask {
            query: req.query,
            kwargs: req.kwargs,
        }
    }
}

impl From<TellRequest> for Invocation {
    fn from(req: TellRequest) -> Self {
        Invocation::Tell {
            format: req.format,
            data: req.data,
            kwargs: req.kwargs,
        }
    }
}

impl From<DoRequest> for Invocation {
    fn from(req: DoRequest) -> Self {
        Invocation::Do {
            action: req.action,
            kwargs: req.kwargs,
        }
    }
}
