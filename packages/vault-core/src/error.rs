use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use thiserror::Error;
use vault_storage::StorageError;

use crate::operation::GraphQLError;

/// Failure reported by the remote execution collaborator.
///
/// `Network` is the only variant that makes a mutation eligible for
/// deferral; every other variant is an ordinary failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ExecutionError {
    pub fn network<E: std::fmt::Display>(e: E) -> Self {
        Self::Network(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    /// Connectivity failure (service unreachable)
    pub fn is_network(&self) -> bool {
        matches!(self, ExecutionError::Network(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Network(_) | ExecutionError::Unauthenticated(_) => {
                ErrorCategory::Transient
            }
            ExecutionError::Transport(_) => ErrorCategory::Infrastructure,
            ExecutionError::Rejected(_) | ExecutionError::Parse(_) => ErrorCategory::Permanent,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::Network(_) => "NETWORK_ERROR",
            ExecutionError::Unauthenticated(_) => "UNAUTHENTICATED",
            ExecutionError::Transport(_) => "TRANSPORT_ERROR",
            ExecutionError::Rejected(_) => "BAD_REQUEST",
            ExecutionError::Parse(_) => "GRAPHQL_PARSE_FAILED",
        }
    }

    /// Render as a response error entry so it can be stored with a task or node
    pub fn to_graphql_error(&self) -> GraphQLError {
        let mut extensions = Map::new();
        extensions.insert("code".to_string(), json!(self.code()));
        extensions.insert("category".to_string(), json!(self.category().as_str()));
        GraphQLError {
            message: self.to_string(),
            path: Vec::new(),
            extensions,
        }
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., invalid input, parse error)
    Permanent,
    /// Infrastructure error - retry, but worth alerting on
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, ExecutionError> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(ExecutionError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors of the query cache's own storage operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache entry corrupted: {0}")]
    Corrupted(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
