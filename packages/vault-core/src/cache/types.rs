//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::canonical::CanonicalOptions;
use crate::fingerprint::FingerprintComponent;
use crate::operation::{ExecutionResult, RequestContext};

/// Cache-vs-network decision per query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Serve from cache whenever an entry exists
    CacheFirst,
    /// Serve from cache only while the service is unhealthy
    #[default]
    NetworkFirst,
    /// Always go to the network (entry still refreshed)
    NoCache,
    /// Always go to the network and refresh the entry
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Network,
    Cache,
}

/// Picks the context values that take part in the fingerprint
pub type ContextSelector = Arc<dyn Fn(&RequestContext) -> Value + Send + Sync>;

/// Per-query cache options
#[derive(Clone, Default)]
pub struct CachedQueryOptions {
    pub serialize: CanonicalOptions,
    pub from_context: Option<ContextSelector>,
    pub ttl_ms: Option<u64>,
    pub mode: Option<CacheMode>,
    pub no_keep: bool,
    pub excludes: Vec<FingerprintComponent>,
}

impl CachedQueryOptions {
    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn no_keep(mut self) -> Self {
        self.no_keep = true;
        self
    }

    pub fn exclude(mut self, component: FingerprintComponent) -> Self {
        self.excludes.push(component);
        self
    }

    pub fn serialize(mut self, options: CanonicalOptions) -> Self {
        self.serialize = options;
        self
    }

    pub fn from_context<F>(mut self, selector: F) -> Self
    where
        F: Fn(&RequestContext) -> Value + Send + Sync + 'static,
    {
        self.from_context = Some(Arc::new(selector));
        self
    }
}

impl fmt::Debug for CachedQueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedQueryOptions")
            .field("serialize", &self.serialize)
            .field("from_context", &self.from_context.as_ref().map(|_| ".."))
            .field("ttl_ms", &self.ttl_ms)
            .field("mode", &self.mode)
            .field("no_keep", &self.no_keep)
            .field("excludes", &self.excludes)
            .finish()
    }
}

/// Inputs and result of the fingerprint an entry was stored under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHash {
    pub calculated: String,
    pub serialized: String,
}

/// Durable cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedQueryResponse {
    pub operation: String,
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_identity: Option<String>,
    pub moment: DateTime<Utc>,
    pub score: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    pub source: CacheSource,
    #[serde(default)]
    pub partial: bool,
    pub response: ExecutionResult,
    pub hash: CacheHash,
}

impl CachedQueryResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(expiration) if expiration <= now)
    }

    /// Usable entries carry a `data` payload
    pub fn has_data(&self) -> bool {
        self.response.data.is_some()
    }
}

/// Cache defaults
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub default_mode: CacheMode,
    /// Truncate fingerprints to this many hex characters
    pub fingerprint_length: Option<usize>,
    /// TTL applied when a query sets none
    pub ttl_ms: Option<u64>,
}
