//! Producer-side modules: the versioned resource store, the authoring hooks
//! that invalidate it, and the conditional delivery endpoint.

pub mod authoring;
pub mod endpoint;
pub mod store;

pub use authoring::Authoring;
pub use endpoint::{router, AppState, DEFAULT_MAX_AGE_SECS};
pub use store::{ResolvedResource, StoreError, VersionedResourceStore, DEFAULT_CACHE_TTL};
