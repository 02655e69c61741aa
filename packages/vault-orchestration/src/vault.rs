//! Vault facade
//!
//! Wires configuration, stores, collaborators, the query cache, the
//! orchestration engine and the delivery queue together:
//!
//! ```text
//! execute ──▶ DeliveryLink ──▶ CachingExecutor ──▶ transport
//! orchestrate ──▶ OrchestrationEngine ──▶ CachingExecutor ──▶ transport
//!                      └──▶ DeliveryQueue (when deferred work exists)
//! drain ──▶ DeliveryQueue ──▶ CachingExecutor / OrchestrationEngine
//! ```

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use vault_core::{
    CachingExecutor, Document, ExecutionError, ExecutionResult, HealthMonitor, HealthProbe,
    IdentityState, ManualProbe, Operation, QueryCache, RemoteExecutor, RequestContext,
};
use vault_storage::{ensure_schema_version, DurableStore, MemoryStore};

use crate::config::VaultConfig;
use crate::delivery::{DeliveryLink, DeliveryQueue, DrainSummary, EventualDeliveryTask};
use crate::engine::OrchestrationEngine;
use crate::error::Result;
use crate::events::EventChannels;
use crate::node::OrchestrationNode;
use crate::notifier::{Notifier, TracingNotifier};
use crate::registry::{OrchestrationRegistry, Registration};
use crate::snapshot::NodeResponse;

pub const CACHE_NAMESPACE: &str = "cache";
pub const QUEUE_NAMESPACE: &str = "queue";
pub const META_NAMESPACE: &str = "meta";
pub const DEAD_LETTER_NAMESPACE: &str = "dead-letter";

/// Result of [`Vault::orchestrate`]
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub response: NodeResponse,
    /// Task persisting the deferred part of the tree, if any
    pub task: Option<EventualDeliveryTask>,
}

impl OrchestrationOutcome {
    pub fn is_eventual(&self) -> bool {
        self.response.exists_eventual()
    }
}

pub struct VaultBuilder {
    transport: Arc<dyn RemoteExecutor>,
    config: VaultConfig,
    probe: Arc<dyn HealthProbe>,
    cache_store: Option<Arc<dyn DurableStore>>,
    queue_store: Option<Arc<dyn DurableStore>>,
    meta_store: Option<Arc<dyn DurableStore>>,
    dead_letter_store: Option<Arc<dyn DurableStore>>,
    identity: Option<Value>,
    notifier: Arc<dyn Notifier>,
    registry: Option<Arc<OrchestrationRegistry>>,
}

impl VaultBuilder {
    pub fn new(transport: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            transport,
            config: VaultConfig::default(),
            probe: Arc::new(ManualProbe::default()),
            cache_store: None,
            queue_store: None,
            meta_store: None,
            dead_letter_store: None,
            identity: None,
            notifier: Arc::new(TracingNotifier),
            registry: None,
        }
    }

    pub fn config(mut self, config: VaultConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn queue_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.queue_store = Some(store);
        self
    }

    pub fn meta_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.meta_store = Some(store);
        self
    }

    pub fn dead_letter_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.dead_letter_store = Some(store);
        self
    }

    /// Every namespace in one SQLite file
    #[cfg(feature = "sqlite")]
    pub fn sqlite(mut self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let cache = vault_storage::SqliteStore::open(path, CACHE_NAMESPACE)?;
        self.queue_store = Some(Arc::new(cache.with_namespace(QUEUE_NAMESPACE)));
        self.meta_store = Some(Arc::new(cache.with_namespace(META_NAMESPACE)));
        self.dead_letter_store = Some(Arc::new(cache.with_namespace(DEAD_LETTER_NAMESPACE)));
        self.cache_store = Some(Arc::new(cache));
        Ok(self)
    }

    pub fn identity(mut self, identity: Value) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(mut self, registry: Arc<OrchestrationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn build(self) -> Result<Vault> {
        let config = self.config;
        config.validate()?;

        let cache_store = self
            .cache_store
            .unwrap_or_else(|| memory_store(CACHE_NAMESPACE));
        let queue_store = self
            .queue_store
            .unwrap_or_else(|| memory_store(QUEUE_NAMESPACE));
        let meta_store = self
            .meta_store
            .unwrap_or_else(|| memory_store(META_NAMESPACE));

        if ensure_schema_version(meta_store.as_ref(), cache_store.as_ref(), config.schema_version)
            .await?
        {
            info!("Vault: cache cleared for schema version {}", config.schema_version);
        }

        let identity = Arc::new(IdentityState::new(
            self.identity,
            config.identity.use_identity.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(self.probe, config.health.clone()));

        let cache = Arc::new(QueryCache::new(
            cache_store,
            health.clone(),
            identity.clone(),
            config.cache.clone(),
        ));
        let cached: Arc<dyn RemoteExecutor> =
            Arc::new(CachingExecutor::new(cache.clone(), self.transport));

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(OrchestrationRegistry::new()));
        let engine = Arc::new(OrchestrationEngine::new(
            cached.clone(),
            health.clone(),
            registry,
        ));

        let mut queue = DeliveryQueue::new(
            queue_store,
            cached.clone(),
            engine.clone(),
            health.clone(),
            identity.clone(),
            config.delivery.clone(),
        );
        if let Some(dead_letter) = self.dead_letter_store {
            queue = queue.with_dead_letter(dead_letter);
        }
        let queue = Arc::new(queue);

        let client: Arc<dyn RemoteExecutor> =
            Arc::new(DeliveryLink::new(cached, queue.clone(), health.clone()));

        info!("Vault: ready (schema version {})", config.schema_version);
        Ok(Vault {
            config,
            identity,
            health,
            cache,
            engine,
            queue,
            client,
            notifier: self.notifier,
        })
    }
}

fn memory_store(namespace: &str) -> Arc<dyn DurableStore> {
    Arc::new(MemoryStore::new(namespace))
}

pub struct Vault {
    config: VaultConfig,
    identity: Arc<IdentityState>,
    health: Arc<HealthMonitor>,
    cache: Arc<QueryCache>,
    engine: Arc<OrchestrationEngine>,
    queue: Arc<DeliveryQueue>,
    client: Arc<dyn RemoteExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl Vault {
    pub fn builder(transport: Arc<dyn RemoteExecutor>) -> VaultBuilder {
        VaultBuilder::new(transport)
    }

    /// Send one operation through delivery, cache and transport
    pub async fn execute(
        &self,
        operation: Operation,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        self.client.execute(operation).await
    }

    pub async fn query(
        &self,
        document: Document,
        variables: Value,
        context: RequestContext,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        self.client.query(document, variables, context).await
    }

    pub async fn mutate(
        &self,
        document: Document,
        variables: Value,
        context: RequestContext,
    ) -> std::result::Result<ExecutionResult, ExecutionError> {
        self.client.mutate(document, variables, context).await
    }

    /// Execute a tree; deferred work is persisted as one delivery task
    pub async fn orchestrate(
        &self,
        node: impl Into<Arc<OrchestrationNode>>,
    ) -> Result<OrchestrationOutcome> {
        let response = self.engine.execute(node).await?;
        let task = if response.exists_eventual() {
            Some(self.queue.enqueue_orchestration(&response).await?)
        } else {
            None
        };
        Ok(OrchestrationOutcome { response, task })
    }

    pub async fn resume(&self, response: NodeResponse) -> Result<NodeResponse> {
        self.engine.resume(response).await
    }

    pub async fn drain(&self, identifiers: &[String]) -> Result<DrainSummary> {
        let summary = self.queue.drain(identifiers).await?;
        self.notifier.notify(&summary.message, summary.level);
        Ok(summary)
    }

    pub async fn drain_all(&self) -> Result<DrainSummary> {
        let summary = self.queue.drain_all().await?;
        self.notifier.notify(&summary.message, summary.level);
        Ok(summary)
    }

    pub fn register<F, Fut>(&self, id: impl Into<String>, factory: F) -> Registration
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<OrchestrationNode>> + Send + 'static,
    {
        self.engine.registry().register(id, factory)
    }

    pub async fn pending_for_registry(&self, registry: &str) -> Result<Vec<String>> {
        self.queue.pending_for_registry(registry).await
    }

    pub fn update_identity(&self, identity: Option<Value>) {
        self.identity.update(identity);
    }

    /// Override the cached health value
    pub fn set_healthy(&self, healthy: bool) {
        self.health.set(healthy);
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<IdentityState> {
        &self.identity
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn events(&self) -> &Arc<EventChannels> {
        self.engine.events()
    }
}
