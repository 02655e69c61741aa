//! Orchestration tree definitions
//!
//! A node pairs an optional operation with the children linked under its
//! fields. Everything that depends on runtime state (operation, variables,
//! context, skip, eventualize) is a [`Resolver`]: either a fixed value or a
//! function of the invocation arguments and the live parent/root snapshots.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use vault_core::{Document, ExecutionResult, RequestContext};

use crate::events::EventChannels;
use crate::snapshot::{NodeOutcome, Snapshot};

// ═══════════════════════════════════════════════════════════════════════════
// Resolvers
// ═══════════════════════════════════════════════════════════════════════════

/// What a resolver sees while a node is being executed
#[derive(Clone)]
pub struct ResolveScope {
    /// Invocation arguments, shared by the whole tree
    pub args: Value,
    pub parent: Option<Arc<Snapshot>>,
    pub root: Arc<Snapshot>,
    pub current: Arc<Snapshot>,
}

impl ResolveScope {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Data stored on the parent node so far
    pub fn parent_data(&self) -> Option<Value> {
        self.parent.as_ref().and_then(|p| p.data())
    }

    pub fn root_data(&self) -> Option<Value> {
        self.root.data()
    }

    pub fn outcome(&self) -> NodeOutcome {
        self.current.outcome()
    }
}

type ComputedFn<T> = Arc<dyn Fn(&ResolveScope) -> anyhow::Result<T> + Send + Sync>;
type AsyncFn<T> = Arc<dyn Fn(ResolveScope) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// A value fixed at definition time or computed when the node runs
pub enum Resolver<T> {
    Static(T),
    Computed(ComputedFn<T>),
    Async(AsyncFn<T>),
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ResolveScope) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Resolver::Computed(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ResolveScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Resolver::Async(Arc::new(move |scope| Box::pin(f(scope))))
    }

    pub async fn resolve(&self, scope: &ResolveScope) -> anyhow::Result<T> {
        match self {
            Resolver::Static(value) => Ok(value.clone()),
            Resolver::Computed(f) => f(scope),
            Resolver::Async(f) => f(scope.clone()).await,
        }
    }

    /// Label used by the tree renderer
    pub fn label(&self) -> &'static str {
        match self {
            Resolver::Static(_) => "Static",
            Resolver::Computed(_) => "Callback",
            Resolver::Async(_) => "Async",
        }
    }
}

impl<T: Clone> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        match self {
            Resolver::Static(value) => Resolver::Static(value.clone()),
            Resolver::Computed(f) => Resolver::Computed(f.clone()),
            Resolver::Async(f) => Resolver::Async(f.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Resolver::Computed(_) => f.write_str("Computed(..)"),
            Resolver::Async(_) => f.write_str("Async(..)"),
        }
    }
}

impl<T: Default> Default for Resolver<T> {
    fn default() -> Self {
        Resolver::Static(T::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Policies
// ═══════════════════════════════════════════════════════════════════════════

/// What happens to the tree when a node's operation returns errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the whole execution
    Break,
    /// Record the errors on the node and keep going
    #[default]
    Continue,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Break => "BREAK",
            FailurePolicy::Continue => "CONTINUE",
        }
    }
}

/// Decision taken when a previously deferred node is resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eventualization {
    #[default]
    Proceed,
    Rejected,
}

/// Callback run before a `break` aborts the tree
pub type Breaker =
    Arc<dyn Fn(ExecutionResult, ResolveScope) -> BoxFuture<'static, ()> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════
// Linked children
// ═══════════════════════════════════════════════════════════════════════════

/// A single child or an ordered list of children under one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linked<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Linked<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let items: &[T] = match self {
            Linked::One(item) => std::slice::from_ref(item),
            Linked::Many(items) => items.as_slice(),
        };
        items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        let items: &mut [T] = match self {
            Linked::One(item) => std::slice::from_mut(item),
            Linked::Many(items) => items.as_mut_slice(),
        };
        items.iter_mut()
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Linked::Many(_))
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, mut f: F) -> Linked<U> {
        match self {
            Linked::One(item) => Linked::One(f(item)),
            Linked::Many(items) => Linked::Many(items.iter().map(f).collect()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Node
// ═══════════════════════════════════════════════════════════════════════════

/// Definition of one orchestration node.
///
/// Definitions are immutable once built and may be shared between trees;
/// per-execution state lives in [`Snapshot`]s.
///
/// ```rust,ignore
/// let tree = OrchestrationNode::new()
///     .named("CreateOrder")
///     .operation(Document::parse("mutation CreateOrder { create }")?)
///     .on_failure(FailurePolicy::Break)
///     .link("notify", OrchestrationNode::new().operation(notify).parallel(true));
/// ```
#[derive(Default)]
pub struct OrchestrationNode {
    pub name: Option<String>,
    pub key: Option<String>,
    pub registry: Option<String>,
    pub arguments: Value,
    pub operation: Option<Resolver<Document>>,
    pub variables: Resolver<Value>,
    pub context: Resolver<RequestContext>,
    pub linked: Vec<(String, Linked<Arc<OrchestrationNode>>)>,
    /// Run in the parallel group of the parent's children
    pub parallel: bool,
    pub skip: Option<Resolver<bool>>,
    pub on_failure: FailurePolicy,
    pub breaker: Option<Breaker>,
    pub eventualize: Option<Resolver<Eventualization>>,
    pub events: Arc<EventChannels>,
}

impl OrchestrationNode {
    pub fn new() -> Self {
        Self {
            variables: Resolver::Static(Value::Object(Map::new())),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn registry(mut self, id: impl Into<String>) -> Self {
        self.registry = Some(id.into());
        self
    }

    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn operation(mut self, document: Document) -> Self {
        self.operation = Some(Resolver::Static(document));
        self
    }

    pub fn operation_with(mut self, resolver: Resolver<Document>) -> Self {
        self.operation = Some(resolver);
        self
    }

    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = Resolver::Static(variables);
        self
    }

    pub fn variables_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResolveScope) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.variables = Resolver::from_fn(f);
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = Resolver::Static(context);
        self
    }

    pub fn context_with(mut self, resolver: Resolver<RequestContext>) -> Self {
        self.context = resolver;
        self
    }

    pub fn link(mut self, field: impl Into<String>, child: OrchestrationNode) -> Self {
        self.linked.push((field.into(), Linked::One(Arc::new(child))));
        self
    }

    pub fn link_shared(mut self, field: impl Into<String>, child: Arc<OrchestrationNode>) -> Self {
        self.linked.push((field.into(), Linked::One(child)));
        self
    }

    pub fn link_many(
        mut self,
        field: impl Into<String>,
        children: impl IntoIterator<Item = OrchestrationNode>,
    ) -> Self {
        let children = children.into_iter().map(Arc::new).collect();
        self.linked.push((field.into(), Linked::Many(children)));
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn skip_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResolveScope) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.skip = Some(Resolver::from_fn(f));
        self
    }

    pub fn skip_with(mut self, resolver: Resolver<bool>) -> Self {
        self.skip = Some(resolver);
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn breaker<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ExecutionResult, ResolveScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.breaker = Some(Arc::new(move |result, scope| Box::pin(f(result, scope))));
        self
    }

    pub fn eventualize<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResolveScope) -> anyhow::Result<Eventualization> + Send + Sync + 'static,
    {
        self.eventualize = Some(Resolver::from_fn(f));
        self
    }

    /// Display name: explicit name, then the static operation's name
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.operation {
            Some(Resolver::Static(doc)) => doc
                .name
                .clone()
                .unwrap_or_else(|| format!("Unnamed{}", capitalize(doc.kind.as_str()))),
            Some(_) => "DynamicOperation".to_string(),
            None => "NoOperation".to_string(),
        }
    }

    pub fn events(&self) -> &Arc<EventChannels> {
        &self.events
    }
}

impl fmt::Debug for OrchestrationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationNode")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("registry", &self.registry)
            .field("operation", &self.operation)
            .field("parallel", &self.parallel)
            .field("on_failure", &self.on_failure)
            .field(
                "linked",
                &self.linked.iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
