use thiserror::Error;
use vault_core::{ErrorCategory, ExecutionError, GraphQLError};
use vault_storage::StorageError;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A node under the `break` failure policy returned errors
    #[error("Orchestration aborted at '{node}': {message}")]
    Break {
        node: String,
        message: String,
        errors: Vec<GraphQLError>,
    },

    #[error("Not an eventual delivery: {0}")]
    NotEventualDelivery(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Execution(e) => e.category(),
            OrchestratorError::Storage(_) => ErrorCategory::Infrastructure,
            OrchestratorError::Other(_) => ErrorCategory::Transient,
            OrchestratorError::Serialization(_)
            | OrchestratorError::InvalidStateTransition { .. }
            | OrchestratorError::Break { .. }
            | OrchestratorError::NotEventualDelivery(_)
            | OrchestratorError::TaskNotFound(_)
            | OrchestratorError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// Response errors describing this failure, for storage on a node or task
    pub fn to_graphql_errors(&self) -> Vec<GraphQLError> {
        match self {
            OrchestratorError::Execution(e) => vec![e.to_graphql_error()],
            OrchestratorError::Break { errors, .. } if !errors.is_empty() => errors.clone(),
            other => vec![GraphQLError::new(other.to_string())
                .with_code("ORCHESTRATION_FAILED")],
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_follows_execution_error() {
        let err: OrchestratorError = ExecutionError::network("offline").into();
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err: OrchestratorError = ExecutionError::Rejected("bad".into()).into();
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_break_keeps_node_errors() {
        let err = OrchestratorError::Break {
            node: "CreateOrder".into(),
            message: "stock exhausted".into(),
            errors: vec![GraphQLError::new("stock exhausted")],
        };
        assert!(err.to_string().contains("CreateOrder"));
        assert_eq!(err.to_graphql_errors()[0].message, "stock exhausted");
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_transition_helper() {
        let err = OrchestratorError::transition("complete", "resolving");
        assert_eq!(err.to_string(), "Invalid state transition: complete -> resolving");
    }
}
