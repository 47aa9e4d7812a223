//! syndic core library
//!
//! Shared types and logic for the syndic Producer and Replicas: resource
//! identifiers, query parameters, wire types, validator math, the Replica
//! cache entry state machine and the conditional fetch client.

pub mod cache;
pub mod protocol;
pub mod query;
pub mod resource;
pub mod sync;
pub mod validator;

pub use cache::{CacheEntry, Validators};
pub use protocol::{ErrorBody, FieldDescriptor, FieldType, HealthSummary, ItemCollection, RemoteItem};
pub use query::ResourceQuery;
pub use resource::{ResourceKey, ResourceKeyError, ResourceKind};
pub use sync::{check_server, FetchError, FetchOutcome, ProducerClient};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
