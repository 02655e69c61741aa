use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vault_core::{Document, EventualDeliveryPolicy, GraphQLError, Operation, RequestContext};

use crate::snapshot::NodeResponse;

/// Retry budget of a task whose policy sets none
pub const DEFAULT_RETRY: u32 = 10;

/// Mutation name of orchestration tasks whose root has no name
pub const ORCHESTRATION_MUTATION: &str = "OrchestrationMutation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Failed,
    #[default]
    Eventual,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Failed => "failed",
            TaskStatus::Eventual => "eventual",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A mutation (or a whole orchestration snapshot) waiting for delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventualDeliveryTask {
    /// Assigned on enqueue: `{instant}-{counter}-{random}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instant: Option<DateTime<Utc>>,
    pub mutation_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Document>,
    #[serde(default)]
    pub variables: Value,
    /// Request context with credentials and the policy removed
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default, rename = "UseIdentity", skip_serializing_if = "Option::is_none")]
    pub use_identity: Option<String>,
    /// Identity captured when the task was enqueued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    /// Remaining retry budget
    pub eventual_retry: u32,
    /// Delivery attempts made so far
    #[serde(default)]
    pub eventual_retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, rename = "EventualDelivery")]
    pub policy: EventualDeliveryPolicy,
    #[serde(
        default,
        rename = "OrchestrationNodeResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub orchestration: Option<NodeResponse>,
    #[serde(
        default,
        rename = "OrchestrationPendents",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub pendents: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl EventualDeliveryTask {
    /// Task for a single deferred mutation
    pub fn mutation(operation: &Operation, policy: EventualDeliveryPolicy) -> Self {
        Self {
            identifier: None,
            instant: None,
            mutation_name: operation.operation_name(),
            query: Some(operation.document.clone()),
            variables: operation.variables.clone(),
            context: operation
                .context
                .without_credentials()
                .without_delivery_policy(),
            use_identity: operation.context.use_identity.clone(),
            identity: None,
            status: TaskStatus::Eventual,
            response: None,
            errors: Vec::new(),
            eventual_retry: policy.retry.unwrap_or(DEFAULT_RETRY),
            eventual_retry_count: 0,
            tags: policy.tags.clone(),
            meta: policy.meta.clone(),
            policy,
            orchestration: None,
            pendents: Vec::new(),
        }
    }

    /// Task carrying a detached orchestration snapshot
    pub fn orchestration(response: NodeResponse, policy: EventualDeliveryPolicy) -> Self {
        let root = &response.outcome;
        let context = root
            .status
            .context
            .as_ref()
            .map(|c| c.without_credentials().without_delivery_policy())
            .unwrap_or_default();

        Self {
            identifier: None,
            instant: None,
            mutation_name: root
                .name
                .clone()
                .unwrap_or_else(|| ORCHESTRATION_MUTATION.to_string()),
            query: root.operation.clone(),
            variables: root
                .status
                .variables
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
            use_identity: context.use_identity.clone(),
            context,
            identity: None,
            status: TaskStatus::Eventual,
            response: None,
            errors: Vec::new(),
            eventual_retry: policy.retry.unwrap_or(DEFAULT_RETRY),
            eventual_retry_count: 0,
            tags: policy.tags.clone(),
            meta: policy.meta.clone(),
            policy,
            pendents: response.pending_fields(),
            orchestration: Some(response.strip_credentials()),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn is_orchestration(&self) -> bool {
        self.orchestration.is_some()
    }

    pub fn registry(&self) -> Option<&str> {
        self.orchestration
            .as_ref()
            .and_then(|o| o.outcome.registry.as_deref())
    }

    /// Spend one retry; the task fails once the budget reaches zero
    pub fn consume_retry(&mut self) {
        self.eventual_retry = self.eventual_retry.saturating_sub(1);
        self.status = if self.eventual_retry == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Eventual
        };
    }
}
