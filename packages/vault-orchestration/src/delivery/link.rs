//! Eventual delivery for bare mutations
//!
//! Sits in front of the remote executor. Mutations whose context carries an
//! active policy are either sent now or turned into queued tasks; the
//! response says which through the `delivery` extension.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use vault_core::{
    EventualDeliveryPolicy, EventualMode, ExecutionError, ExecutionResult, GraphQLError,
    HealthMonitor, Operation, RemoteExecutor,
};

use super::queue::DeliveryQueue;
use super::task::EventualDeliveryTask;

pub const DELIVERY_EXTENSION: &str = "delivery";
pub const EVENTUAL_RESPONSE_EXTENSION: &str = "eventualDeliveryResponse";
pub const MESSAGE_EXTENSION: &str = "message";

pub struct DeliveryLink {
    inner: Arc<dyn RemoteExecutor>,
    queue: Arc<DeliveryQueue>,
    health: Arc<HealthMonitor>,
}

impl DeliveryLink {
    pub fn new(
        inner: Arc<dyn RemoteExecutor>,
        queue: Arc<DeliveryQueue>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            inner,
            queue,
            health,
        }
    }

    async fn defer(
        &self,
        operation: &Operation,
        policy: EventualDeliveryPolicy,
        mut errors: Vec<GraphQLError>,
    ) -> ExecutionResult {
        let name = operation.operation_name();
        let mut task = EventualDeliveryTask::mutation(operation, policy.clone());
        task.errors = errors.clone();

        match self.queue.enqueue(task).await {
            Ok(task) => {
                let message = policy.message.clone().unwrap_or_else(|| {
                    format!("Operation '{}' registered for eventual delivery", name)
                });
                info!("Delivery link: {}", message);
                ExecutionResult::default()
                    .with_extension(DELIVERY_EXTENSION, json!("eventual"))
                    .with_extension(MESSAGE_EXTENSION, Value::String(message))
                    .with_extension(
                        EVENTUAL_RESPONSE_EXTENSION,
                        serde_json::to_value(&task).unwrap_or(Value::Null),
                    )
            }
            Err(e) => {
                warn!("Delivery link: could not queue '{}': {}", name, e);
                errors.extend(e.to_graphql_errors());
                ExecutionResult {
                    errors,
                    ..Default::default()
                }
                .with_extension(DELIVERY_EXTENSION, json!("failed"))
                .with_extension(
                    MESSAGE_EXTENSION,
                    Value::String(format!("Operation '{}' could not be queued", name)),
                )
            }
        }
    }
}

#[async_trait]
impl RemoteExecutor for DeliveryLink {
    async fn execute(&self, operation: Operation) -> Result<ExecutionResult, ExecutionError> {
        if !operation.document.is_mutation() {
            return self.inner.execute(operation).await;
        }
        let policy = match operation.context.delivery_policy() {
            Some(policy) if !policy.bypass => policy.clone(),
            _ => return self.inner.execute(operation).await,
        };

        if policy.eventual == EventualMode::Always || !self.health.is_healthy().await {
            return Ok(self.defer(&operation, policy, Vec::new()).await);
        }

        let forwarded = operation
            .clone()
            .with_context(operation.context.without_delivery_policy());

        match self.inner.execute(forwarded).await {
            Ok(result) if result.has_errors() && policy.eventual.defers_on_error() => {
                Ok(self.defer(&operation, policy, result.errors).await)
            }
            Ok(result) => Ok(result.with_extension(DELIVERY_EXTENSION, json!("immediately"))),
            Err(e) if policy.eventual.defers_on_error() => {
                info!("Delivery link: '{}' failed, deferring: {}", operation.operation_name(), e);
                Ok(self.defer(&operation, policy, vec![e.to_graphql_error()]).await)
            }
            Err(e) => Err(e),
        }
    }
}
