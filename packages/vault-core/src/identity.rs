use parking_lot::RwLock;
use serde_json::Value;

/// Identity collaborator.
///
/// `identity()` is the caller's current principal (typically an object such
/// as `{"userId": "..", "tenant": ".."}`). `use_identity()` names the field
/// that scopes cache entries and deferred tasks.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Option<Value>;

    fn use_identity(&self) -> Option<String> {
        None
    }

    /// Identity value under `field` (or the default field); the whole
    /// identity when no field is configured
    fn scoped(&self, field: Option<&str>) -> Option<Value> {
        let field = field
            .map(str::to_string)
            .or_else(|| self.use_identity());
        scope_identity(self.identity().as_ref(), field.as_deref())
    }
}

pub fn scope_identity(identity: Option<&Value>, field: Option<&str>) -> Option<Value> {
    match field {
        Some(field) => identity.and_then(|id| id.get(field)).cloned(),
        None => identity.cloned(),
    }
}

/// Mutable identity holder
#[derive(Debug, Default)]
pub struct IdentityState {
    identity: RwLock<Option<Value>>,
    use_identity: RwLock<Option<String>>,
}

impl IdentityState {
    pub fn new(identity: Option<Value>, use_identity: Option<String>) -> Self {
        Self {
            identity: RwLock::new(identity),
            use_identity: RwLock::new(use_identity),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn update(&self, identity: Option<Value>) {
        *self.identity.write() = identity;
    }

    pub fn set_use_identity(&self, field: Option<String>) {
        *self.use_identity.write() = field;
    }
}

impl IdentityProvider for IdentityState {
    fn identity(&self) -> Option<Value> {
        self.identity.read().clone()
    }

    fn use_identity(&self) -> Option<String> {
        self.use_identity.read().clone()
    }
}
