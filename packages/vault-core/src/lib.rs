/*
 * Vault Core - operation model, deterministic fingerprints, query cache
 *
 * Components:
 * - Canonicalizer (order-stable values with path exclusion)
 * - Fingerprint Engine (SHA-256 over type-tagged canonical text)
 * - Query Cache (cache-vs-network per query, score + TTL)
 * - Collaborator ports: remote execution, health, identity
 */

pub mod cache;
pub mod canonical;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod health;
pub mod identity;
pub mod operation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use cache::{
    CacheConfig, CacheMode, CacheSource, CachedQueryOptions, CachedQueryResponse,
    CachingExecutor, QueryCache, CACHED_EXTENSION,
};
pub use canonical::{
    canonicalize, key_path, tagged_text, CanonicalOptions, KeyOrder, ListOrder, Path, PathSegment,
};
pub use error::{CacheError, CacheResult, ErrorCategory, ExecutionError};
pub use executor::RemoteExecutor;
pub use fingerprint::{
    fingerprint, Fingerprint, FingerprintComponent, FingerprintOptions, FingerprintParts,
};
pub use health::{HealthConfig, HealthMonitor, HealthProbe, ManualProbe};
pub use identity::{scope_identity, IdentityProvider, IdentityState};
pub use operation::{
    Document, EventualDeliveryPolicy, EventualMode, ExecutionResult, GraphQLError, Operation,
    OperationKind, RequestContext,
};
