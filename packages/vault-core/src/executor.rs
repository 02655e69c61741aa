use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ExecutionError;
use crate::operation::{Document, ExecutionResult, Operation, OperationKind, RequestContext};

/// Remote execution collaborator.
///
/// Connectivity failures must be reported as [`ExecutionError::Network`];
/// application-level failures come back as `Ok` with `errors` populated.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, operation: Operation) -> Result<ExecutionResult, ExecutionError>;

    async fn query(
        &self,
        document: Document,
        variables: Value,
        context: RequestContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        expect_kind(&document, OperationKind::Query)?;
        self.execute(
            Operation::new(document)
                .with_variables(variables)
                .with_context(context),
        )
        .await
    }

    async fn mutate(
        &self,
        document: Document,
        variables: Value,
        context: RequestContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        expect_kind(&document, OperationKind::Mutation)?;
        self.execute(
            Operation::new(document)
                .with_variables(variables)
                .with_context(context),
        )
        .await
    }
}

fn expect_kind(document: &Document, kind: OperationKind) -> Result<(), ExecutionError> {
    if document.kind == kind {
        Ok(())
    } else {
        Err(ExecutionError::Rejected(format!(
            "expected a {} document, got a {}",
            kind, document.kind
        )))
    }
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    async fn execute(&self, operation: Operation) -> Result<ExecutionResult, ExecutionError> {
        (**self).execute(operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_rejects_mutation_document() {
        let executor = ScriptedExecutor::new();
        let doc = Document::parse("mutation Save { save }").unwrap();

        let err = executor
            .query(doc, json!({}), RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected(_)));
        assert_eq!(executor.call_count("Save"), 0);
    }

    #[tokio::test]
    async fn test_mutate_forwards() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("Save", ExecutionResult::data(json!({"save": true})));

        let doc = Document::parse("mutation Save { save }").unwrap();
        let result = executor
            .mutate(doc, json!({"id": 1}), RequestContext::default())
            .await
            .unwrap();

        assert_eq!(result.data, Some(json!({"save": true})));
        assert_eq!(executor.calls()[0].variables, json!({"id": 1}));
    }
}
