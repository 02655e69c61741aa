//! Query cache: fingerprint-keyed memoization of query results

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use vault_storage::{DurableStore, DurableStoreExt};

use super::types::{
    CacheConfig, CacheHash, CacheMode, CacheSource, CachedQueryOptions, CachedQueryResponse,
};
use crate::error::{CacheError, CacheResult, ExecutionError};
use crate::executor::RemoteExecutor;
use crate::fingerprint::{fingerprint, Fingerprint, FingerprintOptions, FingerprintParts};
use crate::health::HealthMonitor;
use crate::identity::IdentityProvider;
use crate::operation::{ExecutionResult, Operation};

/// Extension key carrying the cache entry on a cache hit
pub const CACHED_EXTENSION: &str = "cached";

struct Lookup {
    key: String,
    query: String,
    identity: Option<Value>,
    use_identity: Option<String>,
    fingerprint: Fingerprint,
    options: CachedQueryOptions,
}

pub struct QueryCache {
    store: Arc<dyn DurableStore>,
    health: Arc<HealthMonitor>,
    identity: Arc<dyn IdentityProvider>,
    config: CacheConfig,
}

impl QueryCache {
    pub fn new(
        store: Arc<dyn DurableStore>,
        health: Arc<HealthMonitor>,
        identity: Arc<dyn IdentityProvider>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            health,
            identity,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache key an operation would be stored under
    pub fn key_for(&self, operation: &Operation) -> String {
        self.lookup(operation).key
    }

    /// Serve `operation` from the cache or through `forward`.
    ///
    /// Mutations and subscriptions go straight to `forward`.
    pub async fn intercept<F, Fut>(
        &self,
        operation: Operation,
        forward: F,
    ) -> Result<ExecutionResult, ExecutionError>
    where
        F: FnOnce(Operation) -> Fut + Send,
        Fut: Future<Output = Result<ExecutionResult, ExecutionError>> + Send,
    {
        if !operation.document.is_query() {
            return forward(operation).await;
        }

        let lookup = self.lookup(&operation);
        let healthy = self.health.is_healthy().await;
        let cached = self.load_valid(&lookup.key).await;

        let use_cache = match lookup.options.mode.unwrap_or(self.config.default_mode) {
            CacheMode::CacheFirst => true,
            CacheMode::NoCache | CacheMode::Update => false,
            CacheMode::NetworkFirst => !healthy,
        };

        if use_cache {
            if let Some(entry) = cached {
                debug!("Cache hit {} (score {})", lookup.key, entry.score + 1);
                return Ok(self.serve_hit(&lookup.key, entry).await);
            }
        }

        let previous_score = cached.map(|entry| entry.score).unwrap_or(0);
        let no_keep = lookup.options.no_keep || operation.context.no_keep == Some(true);
        let operation_name = operation.operation_name();
        let variables = operation.variables.clone();

        let started = Instant::now();
        let result = forward(operation).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        if !result.has_errors() && result.data.is_some() && !no_keep {
            let now = Utc::now();
            let ttl_ms = lookup.options.ttl_ms.or(self.config.ttl_ms);
            let mut entry = CachedQueryResponse {
                operation: operation_name,
                query: lookup.query,
                variables,
                identity: lookup.identity,
                use_identity: lookup.use_identity,
                moment: now,
                score: previous_score + 1,
                duration_ms,
                size: None,
                ttl_ms,
                expiration: ttl_ms.map(|ttl| now + chrono::Duration::milliseconds(ttl as i64)),
                source: CacheSource::Network,
                partial: result
                    .extensions
                    .get("hasNext")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                response: result.clone(),
                hash: CacheHash {
                    calculated: lookup.fingerprint.hash,
                    serialized: lookup.fingerprint.canonical,
                },
            };
            entry.size = serde_json::to_vec(&entry).ok().map(|bytes| bytes.len());

            if let Err(e) = self.store.set_as(&lookup.key, &entry).await {
                warn!("Failed to store cache entry {}: {}", lookup.key, e);
            }
        }

        Ok(result)
    }

    pub async fn entry(&self, key: &str) -> CacheResult<Option<CachedQueryResponse>> {
        match self.store.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CacheError::Corrupted(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.store.keys().await?)
    }

    pub async fn evict(&self, key: &str) -> CacheResult<()> {
        Ok(self.store.remove(key).await?)
    }

    pub async fn clear(&self) -> CacheResult<()> {
        Ok(self.store.clear().await?)
    }

    fn lookup(&self, operation: &Operation) -> Lookup {
        let options = operation.context.cached_query.clone().unwrap_or_default();
        let name = operation.operation_name();
        let use_identity = operation
            .context
            .use_identity
            .clone()
            .or_else(|| self.identity.use_identity());
        let identity = self.identity.scoped(use_identity.as_deref());
        let context = options
            .from_context
            .as_ref()
            .map(|select| select(&operation.context))
            .unwrap_or_else(|| json!({}));
        let query = operation.document.printed();

        let parts = FingerprintParts::new()
            .operation(&name)
            .query(&query)
            .identity(identity.clone())
            .variables(operation.variables.clone())
            .context(context);
        let fingerprint = fingerprint(
            &parts,
            &FingerprintOptions {
                canonical: options.serialize.clone(),
                excludes: options.excludes.clone(),
                length: self.config.fingerprint_length,
            },
        );

        Lookup {
            key: fingerprint.cache_key(&name),
            query,
            identity,
            use_identity,
            fingerprint,
            options,
        }
    }

    /// Load an entry, dropping it when it has no data, has expired or
    /// cannot be decoded. Read failures count as a miss.
    async fn load_valid(&self, key: &str) -> Option<CachedQueryResponse> {
        let value = match self.store.get(key).await {
            Ok(value) => value?,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_value::<CachedQueryResponse>(value) {
            Ok(entry) if !entry.has_data() => {
                debug!("Cache entry {} has no data, removing", key);
                self.discard(key).await;
                None
            }
            Ok(entry) if entry.is_expired(Utc::now()) => {
                debug!("Cache entry {} expired, removing", key);
                self.discard(key).await;
                None
            }
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cache entry {} corrupted ({}), removing", key, e);
                self.discard(key).await;
                None
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!("Failed to remove cache entry {}: {}", key, e);
        }
    }

    async fn serve_hit(&self, key: &str, mut entry: CachedQueryResponse) -> ExecutionResult {
        entry.score += 1;
        if let Err(e) = self.store.set_as(key, &entry).await {
            warn!("Failed to update cache score for {}: {}", key, e);
        }

        let mut extensions = entry.response.extensions.clone();
        let mut provenance = entry.clone();
        provenance.source = CacheSource::Cache;
        match serde_json::to_value(&provenance) {
            Ok(value) => {
                extensions.insert(CACHED_EXTENSION.to_string(), value);
            }
            Err(e) => warn!("Failed to encode cache provenance for {}: {}", key, e),
        }

        ExecutionResult {
            data: entry.response.data,
            errors: Vec::new(),
            extensions,
        }
    }
}

/// Remote executor that routes every operation through a [`QueryCache`]
pub struct CachingExecutor {
    cache: Arc<QueryCache>,
    inner: Arc<dyn RemoteExecutor>,
}

impl CachingExecutor {
    pub fn new(cache: Arc<QueryCache>, inner: Arc<dyn RemoteExecutor>) -> Self {
        Self { cache, inner }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }
}

#[async_trait]
impl RemoteExecutor for CachingExecutor {
    async fn execute(&self, operation: Operation) -> Result<ExecutionResult, ExecutionError> {
        let inner = self.inner.clone();
        self.cache
            .intercept(operation, move |op| async move { inner.execute(op).await })
            .await
    }
}
