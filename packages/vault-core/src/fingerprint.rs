//! Fingerprint engine: SHA-256 over the tagged canonical form of named parts

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{canonicalize_at, write_tagged, CanonicalOptions, PathSegment, UNDEFINED_TAG};

/// Named input of a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintComponent {
    Operation,
    Query,
    Identity,
    Variables,
    Context,
}

impl FingerprintComponent {
    pub const ALL: [FingerprintComponent; 5] = [
        FingerprintComponent::Operation,
        FingerprintComponent::Query,
        FingerprintComponent::Identity,
        FingerprintComponent::Variables,
        FingerprintComponent::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintComponent::Operation => "operation",
            FingerprintComponent::Query => "query",
            FingerprintComponent::Identity => "identity",
            FingerprintComponent::Variables => "variables",
            FingerprintComponent::Context => "context",
        }
    }
}

/// Ordered named components; `None` marks an absent (undefined) value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintParts {
    components: Vec<(FingerprintComponent, Option<Value>)>,
}

impl FingerprintParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: FingerprintComponent, value: Option<Value>) -> Self {
        match self.components.iter_mut().find(|(c, _)| *c == component) {
            Some(slot) => slot.1 = value,
            None => self.components.push((component, value)),
        }
        self
    }

    pub fn operation(self, name: impl Into<String>) -> Self {
        self.with(FingerprintComponent::Operation, Some(Value::String(name.into())))
    }

    pub fn query(self, text: impl Into<String>) -> Self {
        self.with(FingerprintComponent::Query, Some(Value::String(text.into())))
    }

    pub fn variables(self, variables: Value) -> Self {
        self.with(FingerprintComponent::Variables, Some(variables))
    }

    pub fn context(self, context: Value) -> Self {
        self.with(FingerprintComponent::Context, Some(context))
    }

    pub fn identity(self, identity: Option<Value>) -> Self {
        self.with(FingerprintComponent::Identity, identity)
    }

    pub fn get(&self, component: FingerprintComponent) -> Option<&Option<Value>> {
        self.components
            .iter()
            .find(|(c, _)| *c == component)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintOptions {
    /// Canonicalization applied to every component; exclusion paths start
    /// with the component name, e.g. `["variables", "cursor"]`
    pub canonical: CanonicalOptions,
    /// Components left out entirely
    pub excludes: Vec<FingerprintComponent>,
    /// Truncate the hex digest to this many characters
    pub length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    /// Tagged canonical text the hash was computed from
    pub canonical: String,
}

impl Fingerprint {
    pub fn cache_key(&self, operation: &str) -> String {
        format!("{}_{}", operation, self.hash)
    }
}

pub fn fingerprint(parts: &FingerprintParts, options: &FingerprintOptions) -> Fingerprint {
    let mut entries: Vec<(&'static str, Option<Value>)> = Vec::new();

    for (component, value) in &parts.components {
        if options.excludes.contains(component) {
            continue;
        }
        let base = [PathSegment::Key(component.as_str().to_string())];
        match value {
            Some(value) => {
                if let Some(canonical) = canonicalize_at(value, &base, &options.canonical) {
                    entries.push((component.as_str(), Some(canonical)));
                }
            }
            None => {
                if canonicalize_at(&Value::Null, &base, &options.canonical).is_some() {
                    entries.push((component.as_str(), None));
                }
            }
        }
    }

    // Component order never affects the hash
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut canonical = String::from("object::{");
    for (idx, (name, value)) in entries.iter().enumerate() {
        if idx > 0 {
            canonical.push(',');
        }
        canonical.push('"');
        canonical.push_str(name);
        canonical.push_str("\":");
        match value {
            Some(value) => write_tagged(value, &mut canonical),
            None => canonical.push_str(UNDEFINED_TAG),
        }
    }
    canonical.push('}');

    let mut hash = format!("{:x}", Sha256::digest(canonical.as_bytes()));
    if let Some(length) = options.length {
        hash.truncate(length);
    }

    Fingerprint { hash, canonical }
}
