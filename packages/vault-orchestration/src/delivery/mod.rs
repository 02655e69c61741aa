//! Eventual delivery: task model, durable queue and the mutation link

pub mod link;
pub mod queue;
pub mod task;

pub use link::{DeliveryLink, DELIVERY_EXTENSION, EVENTUAL_RESPONSE_EXTENSION, MESSAGE_EXTENSION};
pub use queue::{DeliveryConfig, DeliveryQueue, DrainSummary, FailedTaskPolicy, NotifierLevel};
pub use task::{EventualDeliveryTask, TaskStatus, DEFAULT_RETRY, ORCHESTRATION_MUTATION};
