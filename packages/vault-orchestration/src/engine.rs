//! Orchestration engine
//!
//! Walks a definition tree depth-first. A node resolves its context, skip
//! predicate, variables and operation; executes (or defers) the operation;
//! then runs its children: the parallel group concurrently and the
//! sequential group one after another in declaration order, both groups
//! started together. On the way back up every node records whether it or
//! any descendant still has deferred work (`ExistsEventualDeliveryTask`).
//!
//! A detached snapshot can be handed back to [`OrchestrationEngine::resume`];
//! settled subtrees are left alone and resolved nodes are never re-executed.

use chrono::Utc;
use futures::future::{try_join, try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use vault_core::{
    ExecutionError, ExecutionResult, GraphQLError, HealthMonitor, Operation, RemoteExecutor,
};

use crate::error::{OrchestratorError, Result};
use crate::events::{EventChannels, LifecycleEvent, NodeEvent};
use crate::node::{Eventualization, FailurePolicy, Linked, OrchestrationNode, ResolveScope};
use crate::registry::OrchestrationRegistry;
use crate::snapshot::{NodePhase, NodeResponse, Snapshot};

pub const REJECTED_CODE: &str = "EVENTUAL_REJECTED";

pub struct OrchestrationEngine {
    executor: Arc<dyn RemoteExecutor>,
    health: Arc<HealthMonitor>,
    registry: Arc<OrchestrationRegistry>,
    events: Arc<EventChannels>,
}

type ChildRun = (Arc<OrchestrationNode>, Arc<Snapshot>);

impl OrchestrationEngine {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        health: Arc<HealthMonitor>,
        registry: Arc<OrchestrationRegistry>,
    ) -> Self {
        Self {
            executor,
            health,
            registry,
            events: Arc::new(EventChannels::new()),
        }
    }

    /// Events of every node executed by this engine
    pub fn events(&self) -> &Arc<EventChannels> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<OrchestrationRegistry> {
        &self.registry
    }

    /// Execute a tree with the arguments it was defined with
    pub async fn execute(&self, node: impl Into<Arc<OrchestrationNode>>) -> Result<NodeResponse> {
        let node = node.into();
        let args = node.arguments.clone();
        self.execute_with(node, args).await
    }

    pub async fn execute_with(
        &self,
        node: impl Into<Arc<OrchestrationNode>>,
        args: Value,
    ) -> Result<NodeResponse> {
        let node = node.into();
        let root = Snapshot::new();
        info!("Orchestration {}: started", node.label());

        self.run(node.clone(), args, root.clone(), None, root.clone()).await?;

        let response = root.detach();
        info!(
            "Orchestration {}: finished (phase: {}, eventual: {})",
            node.label(),
            response.phase(),
            response.exists_eventual()
        );
        Ok(response)
    }

    /// Continue a previously detached execution.
    ///
    /// The tree is rebuilt from the registry id recorded on the snapshot;
    /// without one (or with an unknown id) the snapshot is returned as is.
    pub async fn resume(&self, response: NodeResponse) -> Result<NodeResponse> {
        let Some(id) = response.outcome.registry.clone() else {
            warn!("Orchestration resume: snapshot has no registry id");
            return Ok(response);
        };
        let args = response
            .outcome
            .status
            .arguments
            .clone()
            .unwrap_or(Value::Null);

        let Some(node) = self.registry.resolve(&id, &args).await? else {
            warn!("Orchestration resume: registry entry '{}' not found", id);
            return Ok(response);
        };

        info!("Orchestration {}: resuming", id);
        let root = Snapshot::attach(&response);
        self.run(node, args, root.clone(), None, root.clone()).await?;
        Ok(root.detach())
    }

    fn run<'a>(
        &'a self,
        node: Arc<OrchestrationNode>,
        args: Value,
        current: Arc<Snapshot>,
        parent: Option<Arc<Snapshot>>,
        root: Arc<Snapshot>,
    ) -> BoxFuture<'a, Result<()>> {
        async move { self.run_node(node, args, current, parent, root).await }.boxed()
    }

    async fn run_node(
        &self,
        node: Arc<OrchestrationNode>,
        args: Value,
        current: Arc<Snapshot>,
        parent: Option<Arc<Snapshot>>,
        root: Arc<Snapshot>,
    ) -> Result<()> {
        let label = node.label();
        current.bind(&node, parent.as_ref());

        let prior = current.outcome();
        let resuming = prior.status.phase != NodePhase::Pending;

        if resuming && prior.status.phase.is_settled() {
            debug!("Node {}: previously settled", label);
            current.update(|o| o.status.previously_resolved = true);
            return Ok(());
        }

        let scope = ResolveScope {
            args: args.clone(),
            parent: parent.clone(),
            root: root.clone(),
            current: current.clone(),
        };

        if resuming && prior.exists_eventual_delivery_task {
            if let Some(eventualize) = &node.eventualize {
                if eventualize.resolve(&scope).await? == Eventualization::Rejected {
                    info!("Node {}: eventual delivery rejected on resume", label);
                    self.reject(&node, &current)?;
                    return Ok(());
                }
            }
        }

        self.emit(&node, LifecycleEvent::Begin, &current);
        current.update(|o| {
            o.status.arguments = Some(args.clone());
            o.status.previously_resolved = prior.status.resolved;
        });

        if !prior.status.resolved {
            current.transition(NodePhase::Resolving)?;
            self.emit(&node, LifecycleEvent::StartedResolve, &current);

            let context = node.context.resolve(&scope).await?;
            current.update(|o| o.status.context = Some(context.clone()));

            if let Some(skip) = &node.skip {
                if skip.resolve(&scope).await? {
                    debug!("Node {}: skipped", label);
                    current.transition(NodePhase::Skipped)?;
                    current.update(|o| {
                        o.status.skipped = true;
                        o.status.deferred = false;
                        o.exists_eventual_delivery_task = false;
                    });
                    self.emit(&node, LifecycleEvent::End, &current);
                    return Ok(());
                }
            }

            let variables = node.variables.resolve(&scope).await?;
            let document = match &node.operation {
                Some(operation) => Some(operation.resolve(&scope).await?),
                None => None,
            };
            current.update(|o| {
                o.status.variables = Some(variables.clone());
                o.operation = document.clone();
                o.status.attempts += 1;
            });

            match document {
                None => {
                    current.transition(NodePhase::Resolved)?;
                    current.update(|o| {
                        o.status.resolved = true;
                        o.status.deferred = false;
                    });
                    self.emit(&node, LifecycleEvent::Resolved, &current);
                }
                Some(document) => {
                    let policy = context.delivery_policy().cloned();
                    let deferrable = document.is_mutation() && policy.is_some();

                    if deferrable && !self.health.is_healthy().await {
                        info!("Node {}: service unhealthy, deferring", label);
                        self.defer(&node, &current)?;
                    } else {
                        let operation = Operation::new(document)
                            .with_variables(variables)
                            .with_context(context.without_delivery_policy());

                        let start = Utc::now();
                        let timer = Instant::now();
                        let outcome = self.executor.execute(operation).await;
                        let elapsed = timer.elapsed().as_millis() as u64;
                        current.update(|o| {
                            o.status.start = Some(start);
                            o.status.end = Some(Utc::now());
                            o.status.time_ms = Some(elapsed);
                        });

                        match outcome {
                            Ok(result) => {
                                self.record(&node, &current, &result)?;
                                if result.has_errors() && node.on_failure == FailurePolicy::Break {
                                    return Err(self.break_tree(&node, result, &scope).await);
                                }
                            }
                            Err(e) if e.is_network() && deferrable => {
                                info!("Node {}: network failure, deferring: {}", label, e);
                                self.defer(&node, &current)?;
                            }
                            Err(e) => {
                                warn!("Node {}: operation failed: {}", label, e);
                                self.fail(&current, &e)?;
                                if node.on_failure == FailurePolicy::Break {
                                    let result = ExecutionResult::error(e.to_graphql_error());
                                    return Err(self.break_tree(&node, result, &scope).await);
                                }
                            }
                        }
                    }
                }
            }
        }

        current.transition(NodePhase::Completing)?;
        self.emit(&node, LifecycleEvent::StartedCompletion, &current);

        self.run_children(&node, &args, &current, &root).await?;

        let status = current.outcome().status;
        let exists = status.deferred || current.children_exist_eventual();
        let failed = !status.resolved && !status.deferred;
        let phase = if exists {
            NodePhase::Deferred
        } else if failed || !current.children_settled() {
            NodePhase::Failed
        } else {
            NodePhase::Complete
        };

        current.update(|o| {
            o.exists_eventual_delivery_task = exists;
            o.status.complete = phase == NodePhase::Complete;
        });
        current.transition(phase)?;

        self.emit(&node, LifecycleEvent::Completed, &current);
        self.emit(&node, LifecycleEvent::End, &current);
        debug!("Node {}: {}", label, phase);
        Ok(())
    }

    async fn run_children(
        &self,
        node: &Arc<OrchestrationNode>,
        args: &Value,
        current: &Arc<Snapshot>,
        root: &Arc<Snapshot>,
    ) -> Result<()> {
        let mut parallel: Vec<ChildRun> = Vec::new();
        let mut sequential: Vec<ChildRun> = Vec::new();

        for (field, linked) in &node.linked {
            let children: Vec<(Option<usize>, &Arc<OrchestrationNode>)> = match linked {
                Linked::One(child) => vec![(None, child)],
                Linked::Many(children) => children
                    .iter()
                    .enumerate()
                    .map(|(idx, child)| (Some(idx), child))
                    .collect(),
            };

            for (index, child) in children {
                // Slot is recorded before the child starts so failures leave a trace
                let slot = current.child_slot(field, index);
                if slot.phase().is_settled() {
                    slot.update(|o| o.status.previously_resolved = true);
                    continue;
                }
                if child.parallel {
                    parallel.push((child.clone(), slot));
                } else {
                    sequential.push((child.clone(), slot));
                }
            }
        }

        let parallel_group = try_join_all(parallel.into_iter().map(|(child, slot)| {
            self.run(child, args.clone(), slot, Some(current.clone()), root.clone())
        }));

        let sequential_group = async {
            for (child, slot) in sequential {
                self.run(child, args.clone(), slot, Some(current.clone()), root.clone())
                    .await?;
            }
            Ok::<(), OrchestratorError>(())
        };

        try_join(parallel_group, sequential_group).await?;
        Ok(())
    }

    fn record(
        &self,
        node: &OrchestrationNode,
        current: &Snapshot,
        result: &ExecutionResult,
    ) -> Result<()> {
        current.transition(NodePhase::Resolved)?;
        current.update(|o| {
            o.data = result.data.clone();
            o.errors = result.errors.clone();
            o.extensions = result.extensions.clone();
            o.status.resolved = true;
            o.status.deferred = false;
        });
        self.emit(node, LifecycleEvent::Resolved, current);
        Ok(())
    }

    fn defer(&self, node: &OrchestrationNode, current: &Snapshot) -> Result<()> {
        current.transition(NodePhase::Deferred)?;
        current.update(|o| {
            o.status.deferred = true;
            o.exists_eventual_delivery_task = true;
        });
        self.emit(node, LifecycleEvent::Eventual, current);
        Ok(())
    }

    fn fail(&self, current: &Snapshot, error: &ExecutionError) -> Result<()> {
        current.transition(NodePhase::Failed)?;
        current.update(|o| {
            o.errors = vec![error.to_graphql_error()];
            o.status.deferred = false;
        });
        Ok(())
    }

    fn reject(&self, node: &OrchestrationNode, current: &Snapshot) -> Result<()> {
        current.transition(NodePhase::Rejected)?;
        current.update(|o| {
            o.errors
                .push(GraphQLError::new("Eventual delivery rejected").with_code(REJECTED_CODE));
            o.status.rejected = true;
            o.status.deferred = false;
            o.status.complete = false;
            o.exists_eventual_delivery_task = false;
        });
        self.emit(node, LifecycleEvent::End, current);
        Ok(())
    }

    async fn break_tree(
        &self,
        node: &OrchestrationNode,
        result: ExecutionResult,
        scope: &ResolveScope,
    ) -> OrchestratorError {
        let label = node.label();
        warn!("Node {}: break policy triggered", label);

        let errors = result.errors.clone();
        if let Some(breaker) = &node.breaker {
            breaker(result, scope.clone()).await;
        }

        OrchestratorError::Break {
            node: label,
            message: errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            errors,
        }
    }

    fn emit(&self, node: &OrchestrationNode, event: LifecycleEvent, current: &Snapshot) {
        let local = node.events.has_subscribers(event);
        let global = self.events.has_subscribers(event);
        if !local && !global {
            return;
        }

        let event = NodeEvent {
            event,
            outcome: current.outcome(),
        };
        if local {
            node.events.publish(&event);
        }
        if global {
            self.events.publish(&event);
        }
    }
}
