//! Execution snapshots
//!
//! A live [`Snapshot`] tree mirrors the definition tree while it runs: each
//! node slot is shared (`Arc`) and guarded by its own lock, parents are held
//! weakly. [`NodeResponse`] is the detached, serializable copy that gets
//! returned to callers and persisted with deferred tasks.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use vault_core::{Document, EventualDeliveryPolicy, GraphQLError, RequestContext};

use crate::error::{OrchestratorError, Result};
use crate::node::{Linked, OrchestrationNode};

// ═══════════════════════════════════════════════════════════════════════════
// Node phase
// ═══════════════════════════════════════════════════════════════════════════

/// Where a node is in its execution pass.
///
/// ```text
/// Pending ──▶ Resolving ──▶ Resolved ─┐
///                 │    └──▶ Deferred ─┼──▶ Completing ──▶ Complete
///                 │    └──▶ Failed ───┘        │     └──▶ Deferred
///                 └──▶ Skipped                 └──────▶ Failed
/// ```
///
/// Deferred and Failed nodes re-enter at Resolving (not yet resolved) or
/// Completing (children pending) when resumed; a resumed deferred node may
/// also end up Rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    #[default]
    Pending,
    Resolving,
    Resolved,
    Skipped,
    Deferred,
    Failed,
    Rejected,
    Completing,
    Complete,
}

impl NodePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Pending => "pending",
            NodePhase::Resolving => "resolving",
            NodePhase::Resolved => "resolved",
            NodePhase::Skipped => "skipped",
            NodePhase::Deferred => "deferred",
            NodePhase::Failed => "failed",
            NodePhase::Rejected => "rejected",
            NodePhase::Completing => "completing",
            NodePhase::Complete => "complete",
        }
    }

    /// Nothing left to do in this subtree
    pub fn is_settled(&self) -> bool {
        matches!(self, NodePhase::Complete | NodePhase::Skipped | NodePhase::Rejected)
    }

    pub fn can_transition(&self, to: NodePhase) -> bool {
        use NodePhase::*;
        matches!(
            (*self, to),
            (Pending, Resolving)
                | (Resolving, Resolved | Skipped | Deferred | Failed)
                | (Resolved | Deferred | Failed, Completing)
                | (Deferred | Failed, Resolving)
                | (Deferred, Rejected)
                | (Completing, Complete | Deferred | Failed)
        )
    }
}

impl std::fmt::Display for NodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Detached types
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub phase: NodePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub complete: bool,
    /// This node's own operation was handed to eventual delivery
    #[serde(default)]
    pub deferred: bool,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub previously_resolved: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Everything recorded on one node, without its children
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Document>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    /// This node or any descendant still has deferred work
    #[serde(default, rename = "ExistsEventualDeliveryTask")]
    pub exists_eventual_delivery_task: bool,
}

impl NodeOutcome {
    pub fn delivery_policy(&self) -> Option<&EventualDeliveryPolicy> {
        self.status.context.as_ref().and_then(|c| c.delivery_policy())
    }
}

/// Detached copy of an executed tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResponse {
    #[serde(flatten)]
    pub outcome: NodeOutcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub linked: BTreeMap<String, Linked<NodeResponse>>,
}

impl NodeResponse {
    pub fn exists_eventual(&self) -> bool {
        self.outcome.exists_eventual_delivery_task
    }

    pub fn data(&self) -> Option<&Value> {
        self.outcome.data.as_ref()
    }

    pub fn errors(&self) -> &[GraphQLError] {
        &self.outcome.errors
    }

    pub fn phase(&self) -> NodePhase {
        self.outcome.status.phase
    }

    pub fn child(&self, field: &str) -> Option<&NodeResponse> {
        match self.linked.get(field)? {
            Linked::One(child) => Some(child),
            Linked::Many(children) => children.first(),
        }
    }

    pub fn children(&self, field: &str) -> Vec<&NodeResponse> {
        self.linked
            .get(field)
            .map(|linked| linked.iter().collect())
            .unwrap_or_default()
    }

    /// Depth-first walk over this node and every descendant
    pub fn walk(&self) -> Vec<&NodeResponse> {
        let mut nodes = vec![self];
        for linked in self.linked.values() {
            for child in linked.iter() {
                nodes.extend(child.walk());
            }
        }
        nodes
    }

    /// Fields whose subtree still has work left
    pub fn pending_fields(&self) -> Vec<String> {
        self.linked
            .iter()
            .filter(|(_, linked)| {
                linked
                    .iter()
                    .any(|child| child.exists_eventual() || !child.phase().is_settled())
            })
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Errors raised by nodes that ran in the latest pass. Nodes carried
    /// over from an earlier pass and rejected nodes are not counted.
    pub fn pass_errors(&self) -> Vec<GraphQLError> {
        self.walk()
            .into_iter()
            .filter(|node| {
                !node.outcome.status.previously_resolved && node.phase() != NodePhase::Rejected
            })
            .flat_map(|node| node.errors().iter().cloned())
            .collect()
    }

    /// The latest pass left nothing to deliver: the tree completed, no node
    /// failed and no node that ran returned errors
    pub fn is_delivered(&self) -> bool {
        self.phase() == NodePhase::Complete
            && !self.exists_eventual()
            && self.walk().iter().all(|node| node.phase() != NodePhase::Failed)
            && self.pass_errors().is_empty()
    }

    /// Put nodes whose operation returned errors in the latest pass back into
    /// the deferred state, together with their ancestors, so the next resume
    /// runs them again. Returns whether anything was reopened.
    pub fn reopen_errored(&mut self) -> bool {
        let mut reopened = false;
        for linked in self.linked.values_mut() {
            for child in linked.iter_mut() {
                reopened |= child.reopen_errored();
            }
        }

        let status = &mut self.outcome.status;
        let errored = status.resolved
            && !status.previously_resolved
            && status.phase != NodePhase::Rejected
            && !self.outcome.errors.is_empty();
        if errored {
            status.resolved = false;
            status.deferred = true;
            reopened = true;
        }
        if reopened {
            status.phase = NodePhase::Deferred;
            status.complete = false;
            self.outcome.exists_eventual_delivery_task = true;
        }
        reopened
    }

    /// Copy with credential headers removed from every node's context
    pub fn strip_credentials(mut self) -> Self {
        if let Some(context) = self.outcome.status.context.take() {
            self.outcome.status.context = Some(context.without_credentials());
        }
        self.linked = self
            .linked
            .into_iter()
            .map(|(field, linked)| {
                let linked = match linked {
                    Linked::One(child) => Linked::One(child.strip_credentials()),
                    Linked::Many(children) => Linked::Many(
                        children.into_iter().map(NodeResponse::strip_credentials).collect(),
                    ),
                };
                (field, linked)
            })
            .collect();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Live snapshot
// ═══════════════════════════════════════════════════════════════════════════

struct SnapshotState {
    outcome: NodeOutcome,
    linked: BTreeMap<String, Linked<Arc<Snapshot>>>,
    node: Option<Arc<OrchestrationNode>>,
    parent: Weak<Snapshot>,
}

/// Mutable per-node execution state.
///
/// All access goes through short synchronous methods; no lock is held
/// across an await point.
pub struct Snapshot {
    state: Mutex<SnapshotState>,
}

impl Snapshot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SnapshotState {
                outcome: NodeOutcome::default(),
                linked: BTreeMap::new(),
                node: None,
                parent: Weak::new(),
            }),
        })
    }

    /// Rebuild a live tree from a detached response
    pub fn attach(response: &NodeResponse) -> Arc<Self> {
        Self::attach_under(response, Weak::new())
    }

    fn attach_under(response: &NodeResponse, parent: Weak<Snapshot>) -> Arc<Self> {
        let snapshot = Self::new();
        let weak = Arc::downgrade(&snapshot);
        let linked = response
            .linked
            .iter()
            .map(|(field, linked)| {
                let linked = linked.map(|child| Self::attach_under(child, weak.clone()));
                (field.clone(), linked)
            })
            .collect();
        {
            let mut state = snapshot.state.lock();
            state.outcome = response.outcome.clone();
            state.linked = linked;
            state.parent = parent;
        }
        snapshot
    }

    /// Detached copy of this subtree, credentials stripped
    pub fn detach(&self) -> NodeResponse {
        let (mut outcome, linked) = {
            let state = self.state.lock();
            (state.outcome.clone(), state.linked.clone())
        };
        if let Some(context) = outcome.status.context.take() {
            outcome.status.context = Some(context.without_credentials());
        }
        NodeResponse {
            outcome,
            linked: linked
                .into_iter()
                .map(|(field, linked)| (field, linked.map(|child| child.detach())))
                .collect(),
        }
    }

    /// Attach the definition and parent, filling addressing fields
    pub fn bind(&self, node: &Arc<OrchestrationNode>, parent: Option<&Arc<Snapshot>>) {
        let mut state = self.state.lock();
        if node.registry.is_some() {
            state.outcome.registry = node.registry.clone();
        }
        if node.key.is_some() {
            state.outcome.key = node.key.clone();
        }
        if state.outcome.name.is_none() {
            state.outcome.name = Some(node.label());
        }
        state.node = Some(node.clone());
        if let Some(parent) = parent {
            state.parent = Arc::downgrade(parent);
        }
    }

    pub fn node(&self) -> Option<Arc<OrchestrationNode>> {
        self.state.lock().node.clone()
    }

    pub fn parent(&self) -> Option<Arc<Snapshot>> {
        self.state.lock().parent.upgrade()
    }

    pub fn outcome(&self) -> NodeOutcome {
        self.state.lock().outcome.clone()
    }

    pub fn data(&self) -> Option<Value> {
        self.state.lock().outcome.data.clone()
    }

    pub fn phase(&self) -> NodePhase {
        self.state.lock().outcome.status.phase
    }

    pub fn exists_eventual(&self) -> bool {
        self.state.lock().outcome.exists_eventual_delivery_task
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut NodeOutcome) -> R) -> R {
        f(&mut self.state.lock().outcome)
    }

    pub fn transition(&self, to: NodePhase) -> Result<()> {
        let mut state = self.state.lock();
        let from = state.outcome.status.phase;
        if !from.can_transition(to) {
            return Err(OrchestratorError::transition(from, to));
        }
        state.outcome.status.phase = to;
        Ok(())
    }

    /// Slot for a child, created (and recorded) before the child runs
    pub fn child_slot(&self, field: &str, index: Option<usize>) -> Arc<Snapshot> {
        let mut state = self.state.lock();
        match index {
            None => {
                if let Some(Linked::One(child)) = state.linked.get(field) {
                    return child.clone();
                }
                let child = Snapshot::new();
                state
                    .linked
                    .insert(field.to_string(), Linked::One(child.clone()));
                child
            }
            Some(index) => {
                let slot = state
                    .linked
                    .entry(field.to_string())
                    .or_insert_with(|| Linked::Many(Vec::new()));
                if !slot.is_many() {
                    *slot = Linked::Many(Vec::new());
                }
                match slot {
                    Linked::Many(children) => {
                        while children.len() <= index {
                            children.push(Snapshot::new());
                        }
                        children[index].clone()
                    }
                    Linked::One(child) => child.clone(),
                }
            }
        }
    }

    pub fn linked(&self, field: &str) -> Option<Linked<Arc<Snapshot>>> {
        self.state.lock().linked.get(field).cloned()
    }

    fn children(&self) -> Vec<Arc<Snapshot>> {
        self.state
            .lock()
            .linked
            .values()
            .flat_map(|linked| linked.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Any child subtree still holding deferred work
    pub fn children_exist_eventual(&self) -> bool {
        self.children().iter().any(|child| child.exists_eventual())
    }

    pub fn children_settled(&self) -> bool {
        self.children().iter().all(|child| child.phase().is_settled())
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Snapshot")
            .field("name", &state.outcome.name)
            .field("phase", &state.outcome.status.phase)
            .field("linked", &state.linked.keys().collect::<Vec<_>>())
            .finish()
    }
}
