//! The built-in `echo` capability.
//!
//! `ask("ping")` answers `"pong"`; any other query is echoed back. Every
//! `ask` is counted so cache behavior can be observed from outside:
//! `do("count")` reports the counter and `do("reset")` zeroes it.

use locus_core::service::query_text;
use locus_core::{IntentTable, Kwargs, LocusError, Result, Service};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

pub const ECHO_CAPABILITY: &str = "echo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EchoAction {
    Reset,
    Count,
}

pub struct EchoService {
    asks: AtomicU64,
    actions: IntentTable<EchoAction>,
}

impl EchoService {
    pub fn new() -> Result<Self> {
        Ok(Self {
            asks: AtomicU64::new(0),
            actions: IntentTable::new()
                .with("reset", EchoAction::Reset)?
                .with("count", EchoAction::Count)?,
        })
    }

    pub fn asks(&self) -> u64 {
        self.asks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Service for EchoService {
    async fn ask(&self, query: Value, _kwargs: Kwargs) -> Result<Value> {
        self.asks.fetch_add(1, Ordering::SeqCst);
        if query_text(&query).trim().eq_ignore_ascii_case("ping") {
            return Ok(json!("pong"));
        }
        Ok(query)
    }

    async fn tell(&self, format: &str, data: Value, _kwargs: Kwargs) -> Result<String> {
        match format {
            "json" => Ok(serde_json::to_string_pretty(&data)?),
            "text" => Ok(query_text(&data)),
            other => Err(LocusError::Validation {
                field: "format".to_string(),
                message: format!("echo cannot render '{}'", other),
            }),
        }
    }

    async fn perform(&self, action: &str, _kwargs: Kwargs) -> Result<Value> {
        match self.actions.dispatch(ECHO_CAPABILITY, action)? {
            EchoAction::Reset => {
                let previous = self.asks.swap(0, Ordering::SeqCst);
                Ok(json!({ "reset": true, "asks": previous }))
            }
            EchoAction::Count => Ok(json!({ "asks": self.asks() })),
        }
    }
}
