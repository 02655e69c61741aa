//! Integration tests for the vault facade
//!
//! Exercises the full wiring: delivery link in front of the cache and
//! transport, orchestrations persisted as tasks, drains reported through the
//! notifier, and SQLite-backed persistence across restarts.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use vault_core::testing::ScriptedExecutor;
use vault_core::{
    Document, EventualDeliveryPolicy, EventualMode, ExecutionError, RequestContext,
};
use vault_orchestration::delivery::link::{
    DELIVERY_EXTENSION, EVENTUAL_RESPONSE_EXTENSION, MESSAGE_EXTENSION,
};
use vault_orchestration::{
    registry_id, NotifierLevel, OrchestrationNode, RecordingNotifier, Vault, VaultConfig,
};
use vault_storage::{DurableStore, MemoryStore};

async fn vault(transport: Arc<ScriptedExecutor>) -> Vault {
    Vault::builder(transport)
        .identity(json!({"userId": "u1"}))
        .build()
        .await
        .unwrap()
}

fn save() -> Document {
    Document::parse("mutation Save($id: ID!) { save(id: $id) }").unwrap()
}

fn eventual(mode: EventualMode) -> RequestContext {
    RequestContext::new()
        .header("authorization", "Bearer secret")
        .eventual(EventualDeliveryPolicy::new(mode))
}

fn delivery(result: &vault_core::ExecutionResult) -> Option<&str> {
    result.extensions.get(DELIVERY_EXTENSION).and_then(Value::as_str)
}

#[tokio::test]
async fn test_always_mode_queues_without_sending() {
    let transport = Arc::new(ScriptedExecutor::new());
    let vault = vault(transport.clone()).await;

    let result = vault
        .mutate(save(), json!({"id": 1}), eventual(EventualMode::Always))
        .await
        .unwrap();

    assert_eq!(delivery(&result), Some("eventual"));
    assert!(result.extensions.contains_key(MESSAGE_EXTENSION));
    let task = &result.extensions[EVENTUAL_RESPONSE_EXTENSION];
    assert_eq!(task["mutationName"], json!("Save"));
    assert_eq!(transport.call_count("Save"), 0);

    let queued = vault.queue().load().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert!(queued[0].context.headers.get("authorization").is_none());
    assert_eq!(queued[0].identity, Some(json!({"userId": "u1"})));
}

#[tokio::test]
async fn test_healthy_mutation_is_sent_immediately() {
    let transport = Arc::new(ScriptedExecutor::new());
    let vault = vault(transport.clone()).await;

    let result = vault
        .mutate(save(), json!({"id": 1}), eventual(EventualMode::OnFirstError))
        .await
        .unwrap();

    assert_eq!(delivery(&result), Some("immediately"));
    assert_eq!(result.data, Some(json!({"Save": true})));
    assert!(transport.call("Save").unwrap().context.eventual_delivery.is_none());
    assert!(vault.queue().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_network_failure_defers_under_error_mode() {
    let transport = Arc::new(ScriptedExecutor::new());
    transport.fail_once("Save", ExecutionError::network("connection reset"));
    let vault = vault(transport.clone()).await;

    let result = vault
        .mutate(save(), json!({"id": 1}), eventual(EventualMode::OnFirstError))
        .await
        .unwrap();

    assert_eq!(delivery(&result), Some("eventual"));
    assert_eq!(transport.call_count("Save"), 1);

    let queued = vault.queue().load().await.unwrap();
    assert_eq!(queued[0].errors[0].code(), Some("NETWORK_ERROR"));

    let summary = vault.drain_all().await.unwrap();
    assert!(summary.result);
    assert_eq!(transport.call_count("Save"), 2);
}

#[tokio::test]
async fn test_no_healthy_mode_surfaces_failures_while_healthy() {
    let transport = Arc::new(ScriptedExecutor::new());
    transport.fail("Save", ExecutionError::Transport("502".into()));
    let vault = vault(transport.clone()).await;

    let err = vault
        .mutate(save(), json!({"id": 1}), eventual(EventualMode::NoHealthy))
        .await
        .unwrap_err();

    assert_eq!(err, ExecutionError::Transport("502".into()));
    assert!(vault.queue().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_no_healthy_mode_defers_while_unhealthy() {
    let transport = Arc::new(ScriptedExecutor::new());
    let vault = vault(transport.clone()).await;
    vault.set_healthy(false);

    let result = vault
        .mutate(save(), json!({"id": 1}), eventual(EventualMode::NoHealthy))
        .await
        .unwrap();

    assert_eq!(delivery(&result), Some("eventual"));
    assert_eq!(transport.call_count("Save"), 0);
}

#[tokio::test]
async fn test_bypassed_policy_and_queries_pass_through() {
    let transport = Arc::new(ScriptedExecutor::new());
    let vault = vault(transport.clone()).await;
    vault.set_healthy(false);

    let mut policy = EventualDeliveryPolicy::new(EventualMode::Always);
    policy.bypass = true;
    let result = vault
        .mutate(save(), json!({"id": 1}), RequestContext::new().eventual(policy))
        .await
        .unwrap();
    assert!(delivery(&result).is_none());
    assert_eq!(transport.call_count("Save"), 1);

    let result = vault
        .query(
            Document::parse("query Get { get }").unwrap(),
            json!({}),
            RequestContext::new(),
        )
        .await
        .unwrap();
    assert!(delivery(&result).is_none());
    assert_eq!(result.data, Some(json!({"Get": true})));
}

fn checkout_tree(id: &str) -> OrchestrationNode {
    OrchestrationNode::new()
        .named("Checkout")
        .registry(id)
        .operation(Document::parse("mutation Checkout { checkout }").unwrap())
        .context(RequestContext::new().eventual(EventualDeliveryPolicy::new(EventualMode::Error)))
        .link(
            "email",
            OrchestrationNode::new()
                .operation(Document::parse("mutation Email { email }").unwrap())
                .context(
                    RequestContext::new()
                        .eventual(EventualDeliveryPolicy::new(EventualMode::Error)),
                )
                .parallel(true),
        )
}

#[tokio::test]
async fn test_orchestrate_then_drain_notifies() {
    let transport = Arc::new(ScriptedExecutor::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let vault = Vault::builder(transport.clone())
        .notifier(notifier.clone())
        .build()
        .await
        .unwrap();

    let id = registry_id("shop", &["checkout"]);
    let factory_id = id.clone();
    vault.register(id.clone(), move |_args| {
        let id = factory_id.clone();
        async move { Ok::<_, anyhow::Error>(checkout_tree(&id)) }
    });

    vault.set_healthy(false);
    let outcome = vault.orchestrate(checkout_tree(&id)).await.unwrap();

    assert!(outcome.is_eventual());
    let task = outcome.task.unwrap();
    assert_eq!(task.pendents, vec!["email".to_string()]);
    assert_eq!(vault.pending_for_registry(&id).await.unwrap().len(), 1);
    assert_eq!(transport.call_count("Checkout"), 0);

    let postponed = vault.drain_all().await.unwrap();
    assert_eq!(postponed.level, NotifierLevel::Warning);

    vault.set_healthy(true);
    let summary = vault.drain_all().await.unwrap();
    assert!(summary.result);
    assert_eq!(transport.call_names(), vec!["Checkout", "Email"]);

    let empty = vault.drain_all().await.unwrap();
    assert_eq!(empty.level, NotifierLevel::Info);

    let levels: Vec<NotifierLevel> = notifier.messages().into_iter().map(|(_, l)| l).collect();
    assert_eq!(
        levels,
        vec![NotifierLevel::Warning, NotifierLevel::Success, NotifierLevel::Info]
    );
}

#[tokio::test]
async fn test_healthy_orchestration_creates_no_task() {
    let transport = Arc::new(ScriptedExecutor::new());
    let vault = vault(transport.clone()).await;

    let outcome = vault
        .orchestrate(checkout_tree(&registry_id("shop", &["checkout"])))
        .await
        .unwrap();

    assert!(!outcome.is_eventual());
    assert!(outcome.task.is_none());
    assert!(vault.queue().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.db");
    let transport = Arc::new(ScriptedExecutor::new());

    {
        let vault = Vault::builder(transport.clone())
            .sqlite(&path)
            .unwrap()
            .build()
            .await
            .unwrap();
        vault
            .mutate(save(), json!({"id": 9}), eventual(EventualMode::Always))
            .await
            .unwrap();
    }

    let vault = Vault::builder(transport.clone())
        .sqlite(&path)
        .unwrap()
        .build()
        .await
        .unwrap();
    assert_eq!(vault.queue().keys().await.unwrap().len(), 1);

    let summary = vault.drain_all().await.unwrap();
    assert!(summary.result);
    assert_eq!(transport.call("Save").unwrap().variables, json!({"id": 9}));
}

#[tokio::test]
async fn test_schema_version_change_clears_cache() {
    let cache = MemoryStore::new("cache");
    let meta = MemoryStore::new("meta");
    let build = |version: u32| {
        let config = VaultConfig {
            schema_version: version,
            ..Default::default()
        };
        Vault::builder(Arc::new(ScriptedExecutor::new()))
            .config(config)
            .cache_store(Arc::new(cache.clone()))
            .meta_store(Arc::new(meta.clone()))
            .build()
    };

    build(1).await.unwrap();
    cache.set("Get_abc", json!({"stale": true})).await.unwrap();

    build(1).await.unwrap();
    assert_eq!(cache.len(), 1);

    build(2).await.unwrap();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = VaultConfig {
        version: 7,
        ..Default::default()
    };

    let result = Vault::builder(Arc::new(ScriptedExecutor::new()))
        .config(config)
        .build()
        .await;

    assert!(result.is_err());
}
