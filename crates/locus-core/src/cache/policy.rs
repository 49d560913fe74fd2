//! Per-capability caching policy.
//!
//! `ask` and `tell` are cached with a TTL unless disabled. `do` is never
//! cached unless the action matches a whitelisted intent; any other `do`
//! invalidates the capability, or the narrower scope its action maps to.

use crate::config::{CacheDefaults, CacheSettings};
use crate::intent::IntentTable;
use crate::service::Method;
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn cached(ttl: Duration) -> Self {
        Self { enabled: true, ttl }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
        }
    }
}

/// What a non-whitelisted `do` clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationScope {
    /// Every cached entry of the capability.
    #[default]
    Capability,
    /// Only entries cached for one method.
    Method(Method),
}

impl InvalidationScope {
    pub fn method(&self) -> Option<Method> {
        match self {
            InvalidationScope::Capability => None,
            InvalidationScope::Method(m) => Some(*m),
        }
    }
}

/// Policies keyed by capability and method, plus the `do` rules.
pub struct PolicyTable {
    ask_default: CachePolicy,
    tell_default: CachePolicy,
    overrides: RwLock<HashMap<(String, Method), CachePolicy>>,
    invalidation: RwLock<HashMap<String, IntentTable<InvalidationScope>>>,
    cacheable_actions: RwLock<HashMap<String, IntentTable<Duration>>>,
    enabled: AtomicBool,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(
            CachePolicy::cached(CacheDefaults::ASK_TTL),
            CachePolicy::cached(CacheDefaults::TELL_TTL),
        )
    }
}

impl PolicyTable {
    pub fn new(ask_default: CachePolicy, tell_default: CachePolicy) -> Self {
        Self {
            ask_default,
            tell_default,
            overrides: RwLock::new(HashMap::new()),
            invalidation: RwLock::new(HashMap::new()),
            cacheable_actions: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            CachePolicy::cached(Duration::from_secs(settings.ask_ttl_secs)),
            CachePolicy::cached(Duration::from_secs(settings.tell_ttl_secs)),
        )
    }

    /// Effective policy for `ask`/`tell`. `do` is always disabled here; see
    /// [`PolicyTable::do_policy`].
    pub fn policy_for(&self, capability: &str, method: Method) -> CachePolicy {
        if !self.is_enabled() || method == Method::Do {
            return CachePolicy::disabled();
        }
        if let Some(policy) = self.overrides.read().get(&(capability.to_string(), method)) {
            return *policy;
        }
        match method {
            Method::Ask => self.ask_default,
            Method::Tell => self.tell_default,
            Method::Do => CachePolicy::disabled(),
        }
    }

    pub fn set_policy(&self, capability: &str, method: Method, policy: CachePolicy) {
        self.overrides
            .write()
            .insert((capability.to_string(), method), policy);
    }

    /// Narrow the invalidation of actions matching `phrase`.
    pub fn set_invalidation(&self, capability: &str, phrase: &str, scope: InvalidationScope) -> Result<()> {
        self.invalidation
            .write()
            .entry(capability.to_string())
            .or_default()
            .insert(phrase, scope)
    }

    pub fn invalidation_for(&self, capability: &str, action: &str) -> InvalidationScope {
        self.invalidation
            .read()
            .get(capability)
            .and_then(|table| table.resolve(action).copied())
            .unwrap_or_default()
    }

    /// Treat actions matching `phrase` as cacheable reads.
    pub fn allow_do_caching(&self, capability: &str, phrase: &str, ttl: Duration) -> Result<()> {
        self.cacheable_actions
            .write()
            .entry(capability.to_string())
            .or_default()
            .insert(phrase, ttl)
    }

    /// `Some` only for whitelisted actions while caching is enabled.
    pub fn do_policy(&self, capability: &str, action: &str) -> Option<CachePolicy> {
        if !self.is_enabled() {
            return None;
        }
        self.cacheable_actions
            .read()
            .get(capability)
            .and_then(|table| table.resolve(action).copied())
            .map(CachePolicy::cached)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable")
            .field("ask_default", &self.ask_default)
            .field("tell_default", &self.tell_default)
            .field("overrides", &self.overrides.read().len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = PolicyTable::default();
        assert_eq!(
            table.policy_for("echo", Method::Ask),
            CachePolicy::cached(CacheDefaults::ASK_TTL)
        );
        assert_eq!(
            table.policy_for("echo", Method::Tell),
            CachePolicy::cached(CacheDefaults::TELL_TTL)
        );
        assert!(!table.policy_for("echo", Method::Do).enabled);
        assert!(table.do_policy("echo", "reset").is_none());
    }

    #[test]
    fn test_override_and_global_switch() {
        let table = PolicyTable::default();
        table.set_policy("clock", Method::Ask, CachePolicy::disabled());
        assert!(!table.policy_for("clock", Method::Ask).enabled);
        assert!(table.policy_for("echo", Method::Ask).enabled);

        table.set_enabled(false);
        assert!(!table.policy_for("echo", Method::Ask).enabled);
        table.set_enabled(true);
        assert!(table.policy_for("echo", Method::Ask).enabled);
    }

    #[test]
    fn test_invalidation_scope_by_intent() {
        let table = PolicyTable::default();
        table
            .set_invalidation("shop", "reformat", InvalidationScope::Method(Method::Tell))
            .unwrap();
        assert_eq!(
            table.invalidation_for("shop", "please reformat prices"),
            InvalidationScope::Method(Method::Tell)
        );
        assert_eq!(table.invalidation_for("shop", "restock"), InvalidationScope::Capability);
        assert_eq!(table.invalidation_for("echo", "reformat"), InvalidationScope::Capability);
    }

    #[test]
    fn test_whitelisted_do() {
        let table = PolicyTable::default();
        table
            .allow_do_caching("shop", "compute total", Duration::from_secs(30))
            .unwrap();
        assert_eq!(
            table.do_policy("shop", "Compute the total"),
            Some(CachePolicy::cached(Duration::from_secs(30)))
        );
        assert!(table.do_policy("shop", "total").is_none());

        table.set_enabled(false);
        assert!(table.do_policy("shop", "compute total").is_none());
    }
}
