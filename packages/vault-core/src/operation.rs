//! Operation model shared by the cache, the engine and the delivery queue

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::cache::CachedQueryOptions;
use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Query or mutation document.
///
/// Only the operation header is inspected: kind and name. The body is kept
/// verbatim and forwarded untouched to the remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
}

impl Document {
    pub fn parse(text: impl Into<String>) -> Result<Self, ExecutionError> {
        let text = text.into();
        let body = strip_comments(&text);
        let body = body.trim_start();

        if body.starts_with('{') {
            return Ok(Self {
                kind: OperationKind::Query,
                name: None,
                text,
            });
        }

        let keyword: String = body
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        let kind = match keyword.as_str() {
            "query" => OperationKind::Query,
            "mutation" => OperationKind::Mutation,
            "subscription" => OperationKind::Subscription,
            _ => {
                return Err(ExecutionError::parse(format!(
                    "Expected an operation definition, found '{}'",
                    body.chars().take(24).collect::<String>()
                )))
            }
        };

        let name: String = body[keyword.len()..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();

        Ok(Self {
            kind,
            name: if name.is_empty() { None } else { Some(name) },
            text,
        })
    }

    pub fn is_query(&self) -> bool {
        self.kind == OperationKind::Query
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == OperationKind::Mutation
    }

    /// Document text with comments dropped and whitespace runs collapsed
    pub fn printed(&self) -> String {
        strip_comments(&self.text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deferral mode of an eventual-delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventualMode {
    /// Defer when the first attempt fails
    #[default]
    OnFirstError,
    /// Defer on any failed attempt
    Error,
    /// Always defer, never send immediately
    Always,
    /// Defer only when the service is unhealthy
    NoHealthy,
}

impl EventualMode {
    /// Whether a failed attempt under this mode should be deferred
    pub fn defers_on_error(&self) -> bool {
        matches!(self, EventualMode::OnFirstError | EventualMode::Error)
    }
}

/// Eventual-delivery policy carried by a mutation's context
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventualDeliveryPolicy {
    #[serde(default)]
    pub eventual: EventualMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, rename = "BYPASS")]
    pub bypass: bool,
}

impl EventualDeliveryPolicy {
    pub fn new(eventual: EventualMode) -> Self {
        Self {
            eventual,
            ..Default::default()
        }
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Per-request context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(
        default,
        rename = "EventualDelivery",
        skip_serializing_if = "Option::is_none"
    )]
    pub eventual_delivery: Option<EventualDeliveryPolicy>,

    /// Cache options never leave the process
    #[serde(skip)]
    pub cached_query: Option<CachedQueryOptions>,

    #[serde(default, rename = "UseIdentity", skip_serializing_if = "Option::is_none")]
    pub use_identity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_keep: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn eventual(mut self, policy: EventualDeliveryPolicy) -> Self {
        self.eventual_delivery = Some(policy);
        self
    }

    pub fn cached(mut self, options: CachedQueryOptions) -> Self {
        self.cached_query = Some(options);
        self
    }

    pub fn use_identity(mut self, field: impl Into<String>) -> Self {
        self.use_identity = Some(field.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Active (non-bypassed) eventual-delivery policy
    pub fn delivery_policy(&self) -> Option<&EventualDeliveryPolicy> {
        self.eventual_delivery.as_ref().filter(|p| !p.bypass)
    }

    /// Copy with every `authorization` header removed, whatever its casing
    pub fn without_credentials(&self) -> Self {
        let mut ctx = self.clone();
        ctx.headers
            .retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
        ctx
    }

    /// Copy with the eventual-delivery policy removed
    pub fn without_delivery_policy(&self) -> Self {
        let mut ctx = self.clone();
        ctx.eventual_delivery = None;
        ctx
    }

    /// Merge `other` on top of `self`; values in `other` win
    pub fn merged(&self, other: &RequestContext) -> Self {
        let mut ctx = self.clone();
        ctx.headers
            .extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if other.eventual_delivery.is_some() {
            ctx.eventual_delivery = other.eventual_delivery.clone();
        }
        if other.cached_query.is_some() {
            ctx.cached_query = other.cached_query.clone();
        }
        if other.use_identity.is_some() {
            ctx.use_identity = other.use_identity.clone();
        }
        if other.no_keep.is_some() {
            ctx.no_keep = other.no_keep;
        }
        for (k, v) in &other.extra {
            ctx.extra.insert(k.clone(), v.clone());
        }
        ctx
    }
}

/// An operation ready to be sent
#[derive(Debug, Clone)]
pub struct Operation {
    pub document: Document,
    pub variables: Value,
    pub context: RequestContext,
}

impl Operation {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            variables: Value::Object(Map::new()),
            context: RequestContext::default(),
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.document.kind
    }

    pub fn operation_name(&self) -> String {
        match (&self.document.name, self.document.kind) {
            (Some(name), _) => name.clone(),
            (None, OperationKind::Query) => "UnnamedQuery".to_string(),
            (None, OperationKind::Mutation) => "UnnamedMutation".to_string(),
            (None, OperationKind::Subscription) => "UnknownOperation".to_string(),
        }
    }
}

/// Field-level error returned by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: Map::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.extensions
            .insert("code".to_string(), Value::String(code.into()));
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ExecutionResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn error(error: GraphQLError) -> Self {
        Self {
            errors: vec![error],
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}
