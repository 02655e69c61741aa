//! Durable eventual-delivery queue
//!
//! Tasks are stored one per key in a [`DurableStore`] namespace. Keys are
//! prefixed with the enqueue instant, so the store's lexical key order is
//! the enqueue order.
//!
//! A drain pass:
//!
//! 1. Health pre-check; an unhealthy service aborts before anything runs
//! 2. Identity check; tasks enqueued under another identity stay queued
//! 3. Delivery: bare mutations are replayed, orchestration tasks resumed
//! 4. Classification into ok / eventual / failed; ok tasks are removed,
//!    eventual tasks rewritten, failed tasks handled per [`FailedTaskPolicy`]

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vault_core::{
    scope_identity, ErrorCategory, HealthMonitor, IdentityProvider, Operation, RemoteExecutor,
};
use vault_storage::{DurableStore, DurableStoreExt, ErrorKind};

use super::task::{EventualDeliveryTask, TaskStatus, DEFAULT_RETRY};
use crate::engine::OrchestrationEngine;
use crate::error::{OrchestratorError, Result};
use crate::snapshot::NodeResponse;

/// What happens to a task once it is classified failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailedTaskPolicy {
    /// Keep it in the queue, never retried again
    #[default]
    Retain,
    /// Move it to the dead-letter store
    DeadLetter,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeliveryConfig {
    pub default_retry: u32,
    pub failed_policy: FailedTaskPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_retry: DEFAULT_RETRY,
            failed_policy: FailedTaskPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl NotifierLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifierLevel::Success => "success",
            NotifierLevel::Info => "info",
            NotifierLevel::Warning => "warning",
            NotifierLevel::Error => "error",
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Serialize)]
pub struct DrainSummary {
    /// Every processed task was delivered
    pub result: bool,
    pub message: String,
    pub level: NotifierLevel,
    pub success: Vec<EventualDeliveryTask>,
    pub failed: Vec<EventualDeliveryTask>,
    pub eventual: Vec<EventualDeliveryTask>,
}

impl DrainSummary {
    fn nothing_to_sync() -> Self {
        Self::empty("Nothing to sync", NotifierLevel::Info)
    }

    fn unhealthy() -> Self {
        Self::empty(
            "Service unavailable, synchronization postponed",
            NotifierLevel::Warning,
        )
    }

    fn empty(message: &str, level: NotifierLevel) -> Self {
        Self {
            result: false,
            message: message.to_string(),
            level,
            success: Vec::new(),
            failed: Vec::new(),
            eventual: Vec::new(),
        }
    }

    fn from_buckets(
        success: Vec<EventualDeliveryTask>,
        failed: Vec<EventualDeliveryTask>,
        eventual: Vec<EventualDeliveryTask>,
    ) -> Self {
        let level = if !failed.is_empty() {
            NotifierLevel::Error
        } else if !eventual.is_empty() {
            NotifierLevel::Warning
        } else {
            NotifierLevel::Success
        };
        let message = format!(
            "Synchronization finished: {} delivered, {} pending, {} failed",
            success.len(),
            eventual.len(),
            failed.len()
        );
        Self {
            result: level == NotifierLevel::Success,
            message,
            level,
            success,
            failed,
            eventual,
        }
    }

    pub fn processed(&self) -> usize {
        self.success.len() + self.failed.len() + self.eventual.len()
    }
}

pub struct DeliveryQueue {
    store: Arc<dyn DurableStore>,
    dead_letter: Option<Arc<dyn DurableStore>>,
    executor: Arc<dyn RemoteExecutor>,
    engine: Arc<OrchestrationEngine>,
    health: Arc<HealthMonitor>,
    identity: Arc<dyn IdentityProvider>,
    config: DeliveryConfig,
    counter: AtomicU64,
}

impl DeliveryQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        executor: Arc<dyn RemoteExecutor>,
        engine: Arc<OrchestrationEngine>,
        health: Arc<HealthMonitor>,
        identity: Arc<dyn IdentityProvider>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            dead_letter: None,
            executor,
            engine,
            health,
            identity,
            config,
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_dead_letter(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.dead_letter = Some(store);
        self
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist a task. New tasks get an identifier, instant and retry budget
    /// and capture the live identity; a task that already has an identifier
    /// keeps them and is rewritten under the same key.
    pub async fn enqueue(&self, mut task: EventualDeliveryTask) -> Result<EventualDeliveryTask> {
        let instant = *task.instant.get_or_insert_with(Utc::now);
        let identifier = match task.identifier.clone() {
            Some(identifier) => identifier,
            None => {
                let identifier = format!(
                    "{}-{:06}-{}",
                    instant.to_rfc3339_opts(SecondsFormat::Millis, true),
                    self.counter.fetch_add(1, Ordering::SeqCst),
                    &Uuid::new_v4().simple().to_string()[..8]
                );
                if task.policy.retry.is_none() {
                    task.eventual_retry = self.config.default_retry;
                }
                task.identifier = Some(identifier.clone());
                identifier
            }
        };

        if task.use_identity.is_none() {
            task.use_identity = self.identity.use_identity();
        }
        if task.identity.is_none() {
            task.identity = self.identity.identity();
        }
        task.status = TaskStatus::Eventual;

        self.store.set_as(&identifier, &task).await?;
        info!(
            "Delivery {}: enqueued '{}' (retry budget {})",
            identifier, task.mutation_name, task.eventual_retry
        );
        Ok(task)
    }

    /// Enqueue the snapshot of an execution that still has deferred work.
    ///
    /// The policy comes from the root's context, or else from the first
    /// deferred node that carries one.
    pub async fn enqueue_orchestration(
        &self,
        response: &NodeResponse,
    ) -> Result<EventualDeliveryTask> {
        if !response.exists_eventual() {
            return Err(OrchestratorError::NotEventualDelivery(
                "orchestration has no deferred work".to_string(),
            ));
        }

        let policy = response
            .outcome
            .delivery_policy()
            .or_else(|| {
                response
                    .walk()
                    .into_iter()
                    .filter(|node| node.outcome.status.deferred)
                    .find_map(|node| node.outcome.delivery_policy())
            })
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::NotEventualDelivery(
                    "orchestration carries no eventual-delivery policy".to_string(),
                )
            })?;

        self.enqueue(EventualDeliveryTask::orchestration(response.clone(), policy))
            .await
    }

    pub async fn update(&self, task: &EventualDeliveryTask) -> Result<()> {
        let identifier = task.key().ok_or_else(|| {
            OrchestratorError::TaskNotFound(format!("task '{}' has no identifier", task.mutation_name))
        })?;
        self.store.set_as(identifier, task).await?;
        Ok(())
    }

    pub async fn get(&self, identifier: &str) -> Result<Option<EventualDeliveryTask>> {
        Ok(self.store.get_as(identifier).await?)
    }

    pub async fn remove(&self, identifier: &str) -> Result<()> {
        self.store.remove(identifier).await?;
        Ok(())
    }

    /// Identifiers in enqueue order
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.store.keys().await?)
    }

    /// Every readable task; corrupt entries are skipped
    pub async fn load(&self) -> Result<Vec<EventualDeliveryTask>> {
        let mut tasks = Vec::new();
        for key in self.store.keys().await? {
            if let Some(task) = self.read(&key).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Identifiers of tasks whose snapshot came from the given registry entry
    pub async fn pending_for_registry(&self, registry: &str) -> Result<Vec<String>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|task| task.registry() == Some(registry))
            .filter_map(|task| task.identifier)
            .collect())
    }

    async fn read(&self, key: &str) -> Result<Option<EventualDeliveryTask>> {
        match self.store.get_as::<EventualDeliveryTask>(key).await {
            Ok(task) => Ok(task),
            Err(e) if e.kind == ErrorKind::Serialization => {
                warn!("Delivery {}: unreadable task skipped: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Drain
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn drain_all(&self) -> Result<DrainSummary> {
        let keys = self.store.keys().await?;
        self.drain(&keys).await
    }

    pub async fn drain(&self, identifiers: &[String]) -> Result<DrainSummary> {
        if identifiers.is_empty() {
            return Ok(DrainSummary::nothing_to_sync());
        }
        if !self.health.is_healthy().await {
            warn!("Delivery drain: service unhealthy, {} task(s) postponed", identifiers.len());
            return Ok(DrainSummary::unhealthy());
        }

        let mut success = Vec::new();
        let mut failed = Vec::new();
        let mut eventual = Vec::new();

        for identifier in identifiers {
            let task = match self.store.get_as::<EventualDeliveryTask>(identifier).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    debug!("Delivery {}: missing, removing key", identifier);
                    self.store.remove(identifier).await?;
                    continue;
                }
                Err(e) if e.kind == ErrorKind::Serialization => {
                    warn!("Delivery {}: unreadable task skipped: {}", identifier, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if task.status == TaskStatus::Failed {
                debug!("Delivery {}: retained failed task skipped", identifier);
                continue;
            }

            if !self.identity_matches(&task) {
                warn!(
                    "Delivery {}: enqueued under another identity, left pending",
                    identifier
                );
                eventual.push(task);
                continue;
            }

            let task = self.deliver(task).await;
            match task.status {
                TaskStatus::Ok => {
                    self.store.remove(identifier).await?;
                    info!("Delivery {}: delivered", identifier);
                    success.push(task);
                }
                TaskStatus::Eventual => {
                    self.store.set_as(identifier, &task).await?;
                    info!(
                        "Delivery {}: still pending ({} retries left)",
                        identifier, task.eventual_retry
                    );
                    eventual.push(task);
                }
                TaskStatus::Failed => {
                    self.settle_failed(identifier, &task).await?;
                    warn!("Delivery {}: failed", identifier);
                    failed.push(task);
                }
            }
        }

        let summary = DrainSummary::from_buckets(success, failed, eventual);
        info!("Delivery drain: {}", summary.message);
        Ok(summary)
    }

    fn identity_matches(&self, task: &EventualDeliveryTask) -> bool {
        let field = task.use_identity.as_deref();
        let live = self.identity.scoped(field);
        let stored = scope_identity(task.identity.as_ref(), field);
        live == stored
    }

    async fn deliver(&self, mut task: EventualDeliveryTask) -> EventualDeliveryTask {
        task.eventual_retry_count += 1;
        match task.orchestration.take() {
            Some(snapshot) => self.resume_orchestration(task, snapshot).await,
            None => self.replay_mutation(task).await,
        }
    }

    async fn replay_mutation(&self, mut task: EventualDeliveryTask) -> EventualDeliveryTask {
        let Some(document) = task.query.clone() else {
            task.status = TaskStatus::Failed;
            task.errors = vec![vault_core::GraphQLError::new("Task carries no operation")];
            return task;
        };

        let operation = Operation::new(document)
            .with_variables(task.variables.clone())
            .with_context(task.context.clone());

        match self.executor.execute(operation).await {
            Ok(result) if !result.has_errors() => {
                task.status = TaskStatus::Ok;
                task.errors.clear();
                task.response = serde_json::to_value(&result).ok();
            }
            Ok(result) => {
                task.errors = result.errors.clone();
                task.response = serde_json::to_value(&result).ok();
                task.consume_retry();
            }
            Err(e) => {
                task.errors = vec![e.to_graphql_error()];
                if e.category() == ErrorCategory::Permanent {
                    task.status = TaskStatus::Failed;
                } else {
                    task.consume_retry();
                }
            }
        }
        task
    }

    async fn resume_orchestration(
        &self,
        mut task: EventualDeliveryTask,
        snapshot: NodeResponse,
    ) -> EventualDeliveryTask {
        match self.engine.resume(snapshot.clone()).await {
            Ok(mut process) => {
                if process.is_delivered() {
                    task.status = TaskStatus::Ok;
                    task.errors.clear();
                } else {
                    task.errors = process.pass_errors();
                    if process.reopen_errored() {
                        debug!(
                            "Delivery {}: errored nodes reopened for the next resume",
                            task.key().unwrap_or_default()
                        );
                    }
                    task.consume_retry();
                }
                task.pendents = process.pending_fields();
                task.response = serde_json::to_value(&process).ok();
                task.orchestration = Some(process);
            }
            Err(e) => {
                task.errors = e.to_graphql_errors();
                if e.category() == ErrorCategory::Permanent {
                    task.status = TaskStatus::Failed;
                } else {
                    task.consume_retry();
                }
                task.orchestration = Some(snapshot);
            }
        }
        task
    }

    async fn settle_failed(&self, identifier: &str, task: &EventualDeliveryTask) -> Result<()> {
        match (self.config.failed_policy, &self.dead_letter) {
            (FailedTaskPolicy::Discard, _) => self.store.remove(identifier).await?,
            (FailedTaskPolicy::DeadLetter, Some(dead_letter)) => {
                dead_letter.set_as(identifier, task).await?;
                self.store.remove(identifier).await?;
            }
            (FailedTaskPolicy::DeadLetter, None) | (FailedTaskPolicy::Retain, _) => {
                self.store.set_as(identifier, task).await?
            }
        }
        Ok(())
    }
}
