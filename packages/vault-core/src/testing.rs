//! Scripted collaborators for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::ExecutionError;
use crate::executor::RemoteExecutor;
use crate::operation::{ExecutionResult, Operation, OperationKind, RequestContext};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub name: String,
    pub kind: OperationKind,
    pub variables: Value,
    pub context: RequestContext,
    pub started: Instant,
    pub finished: Option<Instant>,
}

type Reply = Result<ExecutionResult, ExecutionError>;

/// Remote executor answering from a script, keyed by operation name.
///
/// One-shot replies are consumed first, then the standing reply; operations
/// with no script answer `{"data": {"<name>": true}}`. Every call is recorded
/// with its start and finish instants, and the highest number of
/// simultaneously running calls is tracked.
#[derive(Default)]
pub struct ScriptedExecutor {
    standing: Mutex<HashMap<String, Reply>>,
    once: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: Mutex<HashMap<String, Duration>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn delay_for(&self, name: &str, delay: Duration) {
        self.delays.lock().insert(name.to_string(), delay);
    }

    pub fn respond(&self, name: &str, result: ExecutionResult) {
        self.standing.lock().insert(name.to_string(), Ok(result));
    }

    pub fn fail(&self, name: &str, error: ExecutionError) {
        self.standing.lock().insert(name.to_string(), Err(error));
    }

    pub fn respond_once(&self, name: &str, result: ExecutionResult) {
        self.once
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(Ok(result));
    }

    pub fn fail_once(&self, name: &str, error: ExecutionError) {
        self.once
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.name.clone()).collect()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.name == name).count()
    }

    pub fn call(&self, name: &str) -> Option<RecordedCall> {
        self.calls.lock().iter().find(|c| c.name == name).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn reply(&self, name: &str) -> Reply {
        if let Some(reply) = self.once.lock().get_mut(name).and_then(VecDeque::pop_front) {
            return reply;
        }
        if let Some(reply) = self.standing.lock().get(name) {
            return reply.clone();
        }
        let mut data = Map::new();
        data.insert(name.to_string(), Value::Bool(true));
        Ok(ExecutionResult::data(Value::Object(data)))
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, operation: Operation) -> Result<ExecutionResult, ExecutionError> {
        let name = operation.operation_name();
        let idx = {
            let mut calls = self.calls.lock();
            calls.push(RecordedCall {
                name: name.clone(),
                kind: operation.kind(),
                variables: operation.variables.clone(),
                context: operation.context.clone(),
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = self.delays.lock().get(&name).copied().or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock()[idx].finished = Some(Instant::now());

        self.reply(&name)
    }
}
