//! Management surface for a cached locator, exposed as a [`Service`].
//!
//! Verbs are phrases resolved through an [`IntentTable`]:
//!
//! | phrase              | effect                                   |
//! |---------------------|------------------------------------------|
//! | `cache stats`       | hit/miss counters and tier sizes         |
//! | `list services`     | local and discovered descriptors         |
//! | `clear cache all`   | empty both tiers                         |
//! | `clear expired`     | sweep expired entries now                |
//! | `clear cache`       | invalidate `kwargs.service`              |
//! | `disable caching`   | call through for every capability        |
//! | `enable caching`    | resume caching                           |
//! | `reset stats`       | zero the counters                        |

use crate::cache::{HybridCache, PolicyTable};
use crate::intent::IntentTable;
use crate::locator::ServiceLocator;
use crate::service::{query_text, Kwargs, Method, Service};
use crate::tasks::run_blocking;
use crate::{LocusError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Capability name the admin surface is usually registered under.
pub const ADMIN_CAPABILITY: &str = "locator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminIntent {
    Stats,
    Services,
    ClearAll,
    ClearExpired,
    ClearService,
    Disable,
    Enable,
    ResetStats,
}

fn admin_intents() -> Result<IntentTable<AdminIntent>> {
    IntentTable::new()
        .with("stats", AdminIntent::Stats)?
        .with("services", AdminIntent::Services)?
        .with("clear cache all", AdminIntent::ClearAll)?
        .with("clear expired", AdminIntent::ClearExpired)?
        .with("clear cache", AdminIntent::ClearService)?
        .with("disable caching", AdminIntent::Disable)?
        .with("enable caching", AdminIntent::Enable)?
        .with("reset stats", AdminIntent::ResetStats)
}

pub struct LocatorAdmin {
    locator: Arc<ServiceLocator>,
    cache: Arc<HybridCache>,
    policies: Arc<PolicyTable>,
    intents: IntentTable<AdminIntent>,
}

impl LocatorAdmin {
    pub(crate) fn new(
        locator: Arc<ServiceLocator>,
        cache: Arc<HybridCache>,
        policies: Arc<PolicyTable>,
    ) -> Result<Self> {
        Ok(Self {
            locator,
            cache,
            policies,
            intents: admin_intents()?,
        })
    }

    async fn run(&self, phrase: &str, kwargs: &Kwargs) -> Result<Value> {
        let intent = *self.intents.dispatch(ADMIN_CAPABILITY, phrase)?;
        let cache = self.cache.clone();

        match intent {
            AdminIntent::Stats => {
                let stats = run_blocking(move || cache.stats()).await?;
                Ok(serde_json::to_value(stats)?)
            }
            AdminIntent::Services => Ok(serde_json::to_value(self.locator.list_services())?),
            AdminIntent::ClearAll => {
                let cleared = run_blocking(move || cache.clear()).await?;
                info!("Cleared {} cache entries", cleared);
                Ok(json!({ "cleared": cleared }))
            }
            AdminIntent::ClearExpired => {
                let removed = run_blocking(move || cache.sweep_expired()).await?;
                Ok(json!({ "removed": removed }))
            }
            AdminIntent::ClearService => {
                let service = kwargs
                    .get("service")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LocusError::Validation {
                        field: "service".to_string(),
                        message: "'clear cache' needs kwargs.service (or 'clear cache all')"
                            .to_string(),
                    })?
                    .to_string();
                let method = match kwargs.get("method").and_then(Value::as_str) {
                    Some(m) => Some(Method::parse(m).ok_or_else(|| LocusError::Validation {
                        field: "method".to_string(),
                        message: format!("unknown method '{}'", m),
                    })?),
                    None => None,
                };
                let target = service.clone();
                let cleared = run_blocking(move || cache.invalidate(&target, method)).await?;
                info!(capability = %service, "Cleared {} cache entries", cleared);
                Ok(json!({ "service": service, "cleared": cleared }))
            }
            AdminIntent::Disable => {
                self.policies.set_enabled(false);
                info!("Caching disabled");
                Ok(json!({ "caching": false }))
            }
            AdminIntent::Enable => {
                self.policies.set_enabled(true);
                info!("Caching enabled");
                Ok(json!({ "caching": true }))
            }
            AdminIntent::ResetStats => {
                self.cache.reset_stats();
                Ok(json!({ "reset": true }))
            }
        }
    }
}

/// Render a value as `key: value` lines.
fn render_text(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| match &map[k] {
                    Value::String(s) => format!("{}: {}", k, s),
                    other => format!("{}: {}", k, other),
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(_) => item.to_string(),
                _ => render_text(item),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl Service for LocatorAdmin {
    async fn ask(&self, query: Value, kwargs: Kwargs) -> Result<Value> {
        self.run(&query_text(&query), &kwargs).await
    }

    /// A string `data` is run as an admin phrase and its result rendered;
    /// any other `data` is rendered as given. Formats: `json`, `text`.
    async fn tell(&self, format: &str, data: Value, kwargs: Kwargs) -> Result<String> {
        let value = match &data {
            Value::String(phrase) => self.run(phrase, &kwargs).await?,
            _ => data,
        };
        match format.to_ascii_lowercase().as_str() {
            "json" => Ok(serde_json::to_string_pretty(&value)?),
            "text" | "plain" => Ok(render_text(&value)),
            other => Err(LocusError::Validation {
                field: "format".to_string(),
                message: format!("unsupported format '{}' (expected json or text)", other),
            }),
        }
    }

    async fn perform(&self, action: &str, kwargs: Kwargs) -> Result<Value> {
        self.run(action, &kwargs).await
    }
}
