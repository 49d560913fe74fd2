//! The uniform `ask` / `tell` / `do` surface every capability exposes.
//!
//! Local instances, network proxies, cached wrappers and the locator's own
//! admin surface all implement [`Service`], so callers never know which one
//! they hold.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Keyword arguments passed alongside every call.
pub type Kwargs = serde_json::Map<String, Value>;

/// A capability implementation behind a shared, thread-safe handle.
pub type SharedService = Arc<dyn Service>;

/// One of the three verbs of the uniform service surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Ask,
    Tell,
    Do,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Ask, Method::Tell, Method::Do];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ask => "ask",
            Method::Tell => "tell",
            Method::Do => "do",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ask" => Some(Method::Ask),
            "tell" => Some(Method::Tell),
            "do" => Some(Method::Do),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability: anything answering `ask`, `tell` and `do`.
///
/// `do` is a Rust keyword, so the verb is spelled [`Service::perform`].
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Answer a query. Queries are usually a phrase but may be structured.
    async fn ask(&self, query: Value, kwargs: Kwargs) -> Result<Value>;

    /// Render `data` in the requested format.
    async fn tell(&self, format: &str, data: Value, kwargs: Kwargs) -> Result<String>;

    /// Perform a side-effecting action.
    async fn perform(&self, action: &str, kwargs: Kwargs) -> Result<Value>;
}

/// A fully described call, used wherever a verb has to be carried as data
/// (cache keys, HTTP bodies, generic dispatch).
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Ask { query: Value, kwargs: Kwargs },
    Tell { format: String, data: Value, kwargs: Kwargs },
    Do { action: String, kwargs: Kwargs },
}

impl Invocation {
    pub fn method(&self) -> Method {
        match self {
            Invocation::Ask { .. } => Method::Ask,
            Invocation::Tell { .. } => Method::Tell,
            Invocation::Do { .. } => Method::Do,
        }
    }

    pub fn kwargs(&self) -> &Kwargs {
        match self {
            Invocation::Ask { kwargs, .. }
            | Invocation::Tell { kwargs, .. }
            | Invocation::Do { kwargs, .. } => kwargs,
        }
    }

    /// The arguments as one JSON object, in the shape of the HTTP body.
    pub fn args(&self) -> Value {
        match self {
            Invocation::Ask { query, kwargs } => serde_json::json!({
                "query": query,
                "kwargs": kwargs,
            }),
            Invocation::Tell {
                format,
                data,
                kwargs,
            } => serde_json::json!({
                "format": format,
                "data": data,
                "kwargs": kwargs,
            }),
            Invocation::Do { action, kwargs } => serde_json::json!({
                "action": action,
                "kwargs": kwargs,
            }),
        }
    }

    /// Invoke on a service. `tell` results come back as a JSON string.
    pub async fn dispatch(self, service: &dyn Service) -> Result<Value> {
        match self {
            Invocation::Ask { query, kwargs } => service.ask(query, kwargs).await,
            Invocation::Tell {
                format,
                data,
                kwargs,
            } => service
                .tell(&format, data, kwargs)
                .await
                .map(Value::String),
            Invocation::Do { action, kwargs } => service.perform(&action, kwargs).await,
        }
    }
}

/// Extract the phrase a service should interpret from a query value.
///
/// Strings are used as-is; objects contribute their `query`, `text` or
/// `action` field; anything else is rendered as compact JSON.
pub fn query_text(query: &Value) -> String {
    match query {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["query", "text", "action"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| query.to_string()),
        other => other.to_string(),
    }
}
