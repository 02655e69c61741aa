/*
 * Vault Orchestration - tree execution and eventual delivery
 *
 * Components:
 * - Orchestration Engine (recursive tree walk, parallel/sequential groups)
 * - Snapshots (live per-node state, detached responses, phase machine)
 * - Lifecycle events
 * - Tree registry (rebuild trees on resume)
 * - Delivery Queue (persist, validate, drain deferred work)
 * - Delivery Link (bare mutations)
 * - Vault facade + YAML configuration
 */

pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod events;
pub mod node;
pub mod notifier;
pub mod parse;
pub mod registry;
pub mod render;
pub mod snapshot;
pub mod telemetry;
pub mod vault;

// Re-exports
pub use config::{ConfigError, ConfigResult, IdentityConfig, VaultConfig};
pub use delivery::{
    DeliveryConfig, DeliveryLink, DeliveryQueue, DrainSummary, EventualDeliveryTask,
    FailedTaskPolicy, NotifierLevel, TaskStatus,
};
pub use engine::OrchestrationEngine;
pub use error::{OrchestratorError, Result};
pub use events::{EventChannels, LifecycleEvent, NodeEvent, SubscriptionId};
pub use node::{
    Eventualization, FailurePolicy, Linked, OrchestrationNode, ResolveScope, Resolver,
};
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use parse::{NodeFailure, ParsedNode, ParsedResult};
pub use registry::{registry_id, OrchestrationRegistry, Registration};
pub use render::{render_definition, render_response};
pub use snapshot::{NodeOutcome, NodePhase, NodeResponse, NodeStatus, Snapshot};
pub use telemetry::init_tracing;
pub use vault::{OrchestrationOutcome, Vault, VaultBuilder};
