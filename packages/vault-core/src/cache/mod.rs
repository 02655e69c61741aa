//! Query cache
//!
//! Entries are keyed `"{operation}_{fingerprint}"`, where the fingerprint
//! covers operation name, query text, variables, a caller-selected part of
//! the context, and the scoped identity.

mod query_cache;
mod types;

pub use query_cache::{CachingExecutor, QueryCache, CACHED_EXTENSION};
pub use types::{
    CacheConfig, CacheHash, CacheMode, CacheSource, CachedQueryOptions, CachedQueryResponse,
    ContextSelector,
};
