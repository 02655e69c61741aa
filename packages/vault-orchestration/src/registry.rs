//! Named orchestration trees
//!
//! Deferred tasks persist only the registry id and the invocation
//! arguments of the tree they came from. Resumption rebuilds the tree
//! through this registry, so a tree must be registered under the same id
//! in every process that may drain the queue.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::node::OrchestrationNode;

pub type TreeFactory =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Arc<OrchestrationNode>>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    Created,
    Replaced,
}

/// `registry://{module}:{path-joined-by-dash}`
pub fn registry_id(module: &str, path: &[&str]) -> String {
    format!("registry://{}:{}", module, path.join("-"))
}

#[derive(Default)]
pub struct OrchestrationRegistry {
    trees: DashMap<String, TreeFactory>,
}

impl OrchestrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory that rebuilds the tree from its arguments
    pub fn register<F, Fut>(&self, id: impl Into<String>, factory: F) -> Registration
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<OrchestrationNode>> + Send + 'static,
    {
        let factory: TreeFactory = Arc::new(move |args| {
            let fut = factory(args);
            Box::pin(async move { fut.await.map(Arc::new) })
        });
        self.insert(id.into(), factory)
    }

    /// Register a tree that does not depend on its arguments
    pub fn register_static(
        &self,
        id: impl Into<String>,
        node: Arc<OrchestrationNode>,
    ) -> Registration {
        let factory: TreeFactory = Arc::new(move |_| {
            let node = node.clone();
            Box::pin(async move { Ok(node) })
        });
        self.insert(id.into(), factory)
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.trees.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.trees.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Rebuild the tree registered under `id`; `None` when unknown
    pub async fn resolve(&self, id: &str, args: &Value) -> Result<Option<Arc<OrchestrationNode>>> {
        let factory = self.trees.get(id).map(|entry| entry.value().clone());
        match factory {
            Some(factory) => {
                debug!("Registry {}: rebuilding tree", id);
                Ok(Some(factory(args.clone()).await?))
            }
            None => Ok(None),
        }
    }

    fn insert(&self, id: String, factory: TreeFactory) -> Registration {
        match self.trees.insert(id.clone(), factory) {
            Some(_) => {
                info!("Registry {}: replaced", id);
                Registration::Replaced
            }
            None => {
                info!("Registry {}: created", id);
                Registration::Created
            }
        }
    }
}
