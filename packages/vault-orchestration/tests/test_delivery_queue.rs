//! Integration tests for the eventual-delivery queue
//!
//! Tests the drain pass end to end:
//! - Health pre-check and empty queues
//! - Identity validation
//! - Retry budget and failed-task handling
//! - Orchestration tasks resumed through the registry

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use vault_core::testing::ScriptedExecutor;
use vault_core::{
    Document, EventualDeliveryPolicy, EventualMode, ExecutionError, ExecutionResult,
    GraphQLError, HealthConfig, HealthMonitor, IdentityState, ManualProbe, Operation,
    RequestContext,
};
use vault_orchestration::{
    registry_id, DeliveryConfig, DeliveryQueue, EventualDeliveryTask, FailedTaskPolicy,
    NodePhase, NotifierLevel, OrchestrationEngine, OrchestrationNode, OrchestrationRegistry,
    OrchestratorError, TaskStatus,
};
use vault_storage::{DurableStore, MemoryStore};

struct Harness {
    store: MemoryStore,
    dead_letter: MemoryStore,
    executor: Arc<ScriptedExecutor>,
    probe: Arc<ManualProbe>,
    identity: Arc<IdentityState>,
    registry: Arc<OrchestrationRegistry>,
    engine: Arc<OrchestrationEngine>,
    queue: DeliveryQueue,
}

fn harness(config: DeliveryConfig, use_identity: Option<&str>) -> Harness {
    let store = MemoryStore::new("queue");
    let dead_letter = MemoryStore::new("dead-letter");
    let executor = Arc::new(ScriptedExecutor::new());
    let probe = Arc::new(ManualProbe::new(true));
    let health = Arc::new(HealthMonitor::new(
        probe.clone(),
        HealthConfig {
            check_every_time: true,
            ..Default::default()
        },
    ));
    let identity = Arc::new(IdentityState::new(
        Some(json!({"userId": "u1", "session": "s1"})),
        use_identity.map(str::to_string),
    ));
    let registry = Arc::new(OrchestrationRegistry::new());
    let engine = Arc::new(OrchestrationEngine::new(
        executor.clone(),
        health.clone(),
        registry.clone(),
    ));
    let queue = DeliveryQueue::new(
        Arc::new(store.clone()),
        executor.clone(),
        engine.clone(),
        health,
        identity.clone(),
        config,
    )
    .with_dead_letter(Arc::new(dead_letter.clone()));

    Harness {
        store,
        dead_letter,
        executor,
        probe,
        identity,
        registry,
        engine,
        queue,
    }
}

fn save_task(policy: EventualDeliveryPolicy) -> EventualDeliveryTask {
    let operation =
        Operation::new(Document::parse("mutation Save($id: ID!) { save(id: $id) }").unwrap())
            .with_variables(json!({"id": 7}))
            .with_context(RequestContext::new().eventual(policy.clone()));
    EventualDeliveryTask::mutation(&operation, policy)
}

fn error_policy() -> EventualDeliveryPolicy {
    EventualDeliveryPolicy::new(EventualMode::Error)
}

#[tokio::test]
async fn test_enqueue_assigns_ordered_identifiers() {
    let h = harness(DeliveryConfig::default(), None);

    let first = h.queue.enqueue(save_task(error_policy())).await.unwrap();
    let second = h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let keys = h.queue.keys().await.unwrap();
    assert_eq!(
        keys,
        vec![first.identifier.clone().unwrap(), second.identifier.clone().unwrap()]
    );
    assert_eq!(first.status, TaskStatus::Eventual);
    assert_eq!(first.identity, Some(json!({"userId": "u1", "session": "s1"})));
    assert!(first.instant.is_some());
}

#[tokio::test]
async fn test_reenqueue_keeps_identifier_and_instant() {
    let h = harness(DeliveryConfig::default(), None);
    let first = h.queue.enqueue(save_task(error_policy().retry(4))).await.unwrap();

    let mut changed = first.clone();
    changed.eventual_retry = 2;
    h.identity.update(Some(json!({"userId": "u2"})));
    let again = h.queue.enqueue(changed).await.unwrap();

    assert_eq!(again.identifier, first.identifier);
    assert_eq!(again.instant, first.instant);
    assert_eq!(again.eventual_retry, 2);
    assert_eq!(again.identity, first.identity);
    assert_eq!(h.queue.keys().await.unwrap(), vec![first.identifier.clone().unwrap()]);
    let stored = h.queue.get(first.key().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.eventual_retry, 2);
}

#[tokio::test]
async fn test_enqueue_applies_configured_retry_budget() {
    let config = DeliveryConfig {
        default_retry: 3,
        ..Default::default()
    };
    let h = harness(config, None);

    let defaulted = h.queue.enqueue(save_task(error_policy())).await.unwrap();
    let explicit = h.queue.enqueue(save_task(error_policy().retry(5))).await.unwrap();

    assert_eq!(defaulted.eventual_retry, 3);
    assert_eq!(explicit.eventual_retry, 5);
}

#[tokio::test]
async fn test_empty_queue_has_nothing_to_sync() {
    let h = harness(DeliveryConfig::default(), None);

    let summary = h.queue.drain_all().await.unwrap();

    assert!(!summary.result);
    assert_eq!(summary.level, NotifierLevel::Info);
    assert_eq!(summary.message, "Nothing to sync");
}

#[tokio::test]
async fn test_unhealthy_service_postpones_drain() {
    let h = harness(DeliveryConfig::default(), None);
    h.queue.enqueue(save_task(error_policy())).await.unwrap();
    h.probe.set(false);

    let summary = h.queue.drain_all().await.unwrap();

    assert!(!summary.result);
    assert_eq!(summary.level, NotifierLevel::Warning);
    assert_eq!(summary.processed(), 0);
    assert_eq!(h.executor.call_count("Save"), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_successful_delivery_removes_task() {
    let h = harness(DeliveryConfig::default(), None);
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let summary = h.queue.drain_all().await.unwrap();

    assert!(summary.result);
    assert_eq!(summary.level, NotifierLevel::Success);
    assert_eq!(summary.success.len(), 1);
    assert_eq!(summary.success[0].status, TaskStatus::Ok);
    assert!(h.store.is_empty());

    let call = h.executor.call("Save").unwrap();
    assert_eq!(call.variables, json!({"id": 7}));
    assert!(call.context.eventual_delivery.is_none());
}

#[tokio::test]
async fn test_drain_selected_identifiers_only() {
    let h = harness(DeliveryConfig::default(), None);
    let first = h.queue.enqueue(save_task(error_policy())).await.unwrap();
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let summary = h
        .queue
        .drain(&[first.identifier.clone().unwrap()])
        .await
        .unwrap();

    assert_eq!(summary.processed(), 1);
    assert_eq!(h.executor.call_count("Save"), 1);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_identity_mismatch_leaves_task_pending() {
    let h = harness(DeliveryConfig::default(), Some("userId"));
    let task = h.queue.enqueue(save_task(error_policy())).await.unwrap();
    assert_eq!(task.use_identity.as_deref(), Some("userId"));

    h.identity.update(Some(json!({"userId": "u2", "session": "s1"})));
    let summary = h.queue.drain_all().await.unwrap();

    assert_eq!(summary.level, NotifierLevel::Warning);
    assert_eq!(summary.eventual.len(), 1);
    assert_eq!(h.executor.call_count("Save"), 0);

    let stored = h.queue.get(task.key().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.eventual_retry_count, 0);
    assert_eq!(stored.eventual_retry, task.eventual_retry);
}

#[tokio::test]
async fn test_scoped_identity_ignores_other_fields() {
    let h = harness(DeliveryConfig::default(), Some("userId"));
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    h.identity.update(Some(json!({"userId": "u1", "session": "s2"})));
    let summary = h.queue.drain_all().await.unwrap();

    assert!(summary.result);
    assert_eq!(h.executor.call_count("Save"), 1);
}

#[tokio::test]
async fn test_unscoped_identity_compares_whole_value() {
    let h = harness(DeliveryConfig::default(), None);
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    h.identity.update(Some(json!({"userId": "u1", "session": "s2"})));
    let summary = h.queue.drain_all().await.unwrap();

    assert_eq!(summary.eventual.len(), 1);
    assert_eq!(h.executor.call_count("Save"), 0);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_task() {
    let h = harness(DeliveryConfig::default(), None);
    h.executor.fail("Save", ExecutionError::network("offline"));
    let task = h.queue.enqueue(save_task(error_policy().retry(2))).await.unwrap();
    let key = task.key().unwrap().to_string();

    let first = h.queue.drain_all().await.unwrap();
    assert_eq!(first.level, NotifierLevel::Warning);
    assert_eq!(first.eventual[0].eventual_retry, 1);
    assert_eq!(first.eventual[0].eventual_retry_count, 1);

    let second = h.queue.drain_all().await.unwrap();
    assert!(!second.result);
    assert_eq!(second.level, NotifierLevel::Error);
    assert_eq!(second.failed.len(), 1);
    assert_eq!(second.failed[0].errors[0].code(), Some("NETWORK_ERROR"));

    let retained = h.queue.get(&key).await.unwrap().unwrap();
    assert_eq!(retained.status, TaskStatus::Failed);
    assert_eq!(retained.eventual_retry, 0);

    // Retained failures are never retried
    let third = h.queue.drain_all().await.unwrap();
    assert_eq!(third.processed(), 0);
    assert_eq!(third.level, NotifierLevel::Success);
    assert_eq!(h.executor.call_count("Save"), 2);
}

#[tokio::test]
async fn test_application_errors_consume_retry() {
    let h = harness(DeliveryConfig::default(), None);
    h.executor
        .respond_once("Save", ExecutionResult::error(GraphQLError::new("conflict")));
    h.queue.enqueue(save_task(error_policy().retry(3))).await.unwrap();

    let first = h.queue.drain_all().await.unwrap();
    assert_eq!(first.eventual.len(), 1);
    assert_eq!(first.eventual[0].errors[0].message, "conflict");

    let second = h.queue.drain_all().await.unwrap();
    assert!(second.result);
    assert_eq!(second.success[0].eventual_retry_count, 2);
}

#[tokio::test]
async fn test_permanent_error_moves_to_dead_letter() {
    let config = DeliveryConfig {
        failed_policy: FailedTaskPolicy::DeadLetter,
        ..Default::default()
    };
    let h = harness(config, None);
    h.executor
        .fail("Save", ExecutionError::Rejected("invalid input".into()));
    let task = h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let summary = h.queue.drain_all().await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert!(h.store.is_empty());
    let moved: Value = h
        .dead_letter
        .get(task.key().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved["status"], json!("failed"));
}

#[tokio::test]
async fn test_discard_policy_drops_failed_task() {
    let config = DeliveryConfig {
        failed_policy: FailedTaskPolicy::Discard,
        ..Default::default()
    };
    let h = harness(config, None);
    h.executor
        .fail("Save", ExecutionError::Rejected("invalid input".into()));
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let summary = h.queue.drain_all().await.unwrap();

    assert_eq!(summary.level, NotifierLevel::Error);
    assert!(h.store.is_empty());
    assert!(h.dead_letter.is_empty());
}

#[tokio::test]
async fn test_missing_identifier_is_dropped() {
    let h = harness(DeliveryConfig::default(), None);

    let summary = h.queue.drain(&["missing".to_string()]).await.unwrap();

    assert_eq!(summary.processed(), 0);
    assert_eq!(summary.level, NotifierLevel::Success);
}

#[tokio::test]
async fn test_corrupt_entry_is_skipped_not_removed() {
    let h = harness(DeliveryConfig::default(), None);
    h.store.set("0000-corrupt", json!("garbage")).await.unwrap();
    h.queue.enqueue(save_task(error_policy())).await.unwrap();

    let summary = h.queue.drain_all().await.unwrap();

    assert!(summary.result);
    assert_eq!(summary.processed(), 1);
    assert_eq!(h.queue.keys().await.unwrap(), vec!["0000-corrupt".to_string()]);
    assert!(h.queue.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_orchestration_task_resumes_through_registry() {
    let h = harness(DeliveryConfig::default(), None);
    let id = registry_id("orders", &["checkout"]);
    let tree = Arc::new(
        OrchestrationNode::new()
            .named("Checkout")
            .registry(id.clone())
            .operation(Document::parse("mutation Checkout { checkout }").unwrap())
            .context(RequestContext::new().eventual(error_policy().retry(4)))
            .link(
                "receipt",
                OrchestrationNode::new()
                    .operation(Document::parse("query Receipt { receipt }").unwrap()),
            ),
    );
    h.registry.register_static(id.clone(), tree.clone());

    h.probe.set(false);
    let response = h.engine.execute(tree).await.unwrap();
    assert!(response.exists_eventual());

    let task = h.queue.enqueue_orchestration(&response).await.unwrap();
    assert!(task.is_orchestration());
    assert_eq!(task.mutation_name, "Checkout");
    assert_eq!(task.eventual_retry, 4);
    assert_eq!(task.registry(), Some(id.as_str()));
    assert_eq!(h.queue.pending_for_registry(&id).await.unwrap().len(), 1);

    h.probe.set(true);
    let summary = h.queue.drain_all().await.unwrap();

    assert!(summary.result);
    assert_eq!(h.executor.call_count("Checkout"), 1);
    assert_eq!(h.executor.call_count("Receipt"), 1);
    let delivered = summary.success[0].orchestration.as_ref().unwrap();
    assert!(!delivered.exists_eventual());
    assert!(h.queue.pending_for_registry(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enqueue_orchestration_requires_deferred_work() {
    let h = harness(DeliveryConfig::default(), None);
    let tree = OrchestrationNode::new()
        .operation(Document::parse("query Get { get }").unwrap());
    let response = h.engine.execute(tree).await.unwrap();

    let err = h.queue.enqueue_orchestration(&response).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::NotEventualDelivery(_)));
    assert!(h.store.is_empty());
}

/// No-op root with a deferred `Save` mutation below it
fn nested_save_tree(id: &str) -> Arc<OrchestrationNode> {
    Arc::new(
        OrchestrationNode::new()
            .named("Order")
            .registry(id)
            .context(RequestContext::new().eventual(error_policy().retry(3)))
            .link(
                "save",
                OrchestrationNode::new()
                    .operation(Document::parse("mutation Save { save }").unwrap())
                    .context(RequestContext::new().eventual(error_policy())),
            ),
    )
}

async fn enqueue_nested(h: &Harness, id: &str) -> EventualDeliveryTask {
    let tree = nested_save_tree(id);
    h.registry.register_static(id.to_string(), tree.clone());

    h.probe.set(false);
    let response = h.engine.execute(tree).await.unwrap();
    assert!(response.child("save").unwrap().outcome.status.deferred);
    let task = h.queue.enqueue_orchestration(&response).await.unwrap();
    h.probe.set(true);
    task
}

#[tokio::test]
async fn test_nested_deferred_mutation_is_delivered() {
    let h = harness(DeliveryConfig::default(), None);
    enqueue_nested(&h, &registry_id("orders", &["nested"])).await;

    let summary = h.queue.drain_all().await.unwrap();

    assert!(summary.result);
    assert_eq!(h.executor.call_count("Save"), 1);
    let delivered = summary.success[0].orchestration.as_ref().unwrap();
    assert_eq!(delivered.child("save").unwrap().phase(), NodePhase::Complete);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_nested_transport_failure_keeps_task_queued() {
    let h = harness(DeliveryConfig::default(), None);
    h.executor
        .fail_once("Save", ExecutionError::Transport("502".into()));
    let task = enqueue_nested(&h, &registry_id("orders", &["transport"])).await;

    let first = h.queue.drain_all().await.unwrap();

    assert!(!first.result);
    assert!(first.success.is_empty());
    assert_eq!(first.level, NotifierLevel::Warning);
    let pending = &first.eventual[0];
    assert_eq!(pending.eventual_retry, 2);
    assert_eq!(pending.errors[0].code(), Some("TRANSPORT_ERROR"));
    assert_eq!(pending.pendents, vec!["save".to_string()]);
    let snapshot = pending.orchestration.as_ref().unwrap();
    assert_eq!(snapshot.child("save").unwrap().phase(), NodePhase::Failed);
    assert_eq!(h.queue.keys().await.unwrap(), vec![task.identifier.clone().unwrap()]);

    let second = h.queue.drain_all().await.unwrap();

    assert!(second.result);
    assert_eq!(h.executor.call_count("Save"), 2);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_nested_application_errors_are_retried() {
    let h = harness(DeliveryConfig::default(), None);
    h.executor
        .respond_once("Save", ExecutionResult::error(GraphQLError::new("conflict")));
    enqueue_nested(&h, &registry_id("orders", &["conflict"])).await;

    let first = h.queue.drain_all().await.unwrap();

    assert_eq!(first.eventual.len(), 1);
    assert_eq!(first.eventual[0].errors[0].message, "conflict");
    let snapshot = first.eventual[0].orchestration.as_ref().unwrap();
    assert!(snapshot.exists_eventual());
    assert!(snapshot.child("save").unwrap().outcome.status.deferred);

    let second = h.queue.drain_all().await.unwrap();

    assert!(second.result);
    assert_eq!(h.executor.call_count("Save"), 2);
    assert!(second.success[0].errors.is_empty());
}
