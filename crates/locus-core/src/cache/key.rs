//! Deterministic cache keys.
//!
//! A key is the lowercase hex SHA-256 of
//! `capability \0 method \0 canonical_json(args)`. Canonical JSON sorts
//! object keys recursively, so keyword arguments hash the same regardless of
//! the order they were supplied in.

use crate::service::{Invocation, Method};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: String,
    capability: String,
    method: Method,
}

impl CacheKey {
    pub fn new(capability: &str, method: Method, args: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(capability.as_bytes());
        hasher.update([0u8]);
        hasher.update(method.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(args).as_bytes());

        Self {
            digest: hex::encode(hasher.finalize()),
            capability: capability.to_string(),
            method,
        }
    }

    pub fn for_invocation(capability: &str, invocation: &Invocation) -> Self {
        Self::new(capability, invocation.method(), &invocation.args())
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Shard index from the first 8 hex digits of the digest.
    pub fn shard(&self, shards: usize) -> usize {
        let prefix = self.digest.get(..8).unwrap_or("0");
        let n = u64::from_str_radix(prefix, 16).unwrap_or(0);
        (n % shards.max(1) as u64) as usize
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
