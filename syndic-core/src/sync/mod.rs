//! Conditional HTTP fetching of Producer resources.
//!
//! ## Protocol
//!
//! 1. The Replica sends `GET /resources/<kind>?resource=<category>` with the
//!    stored `If-None-Match` / `If-Modified-Since` validators
//! 2. The Producer answers 200 (body + new validators), 304, 400
//!    `bad_resource`, 403, or any other error status
//! 3. The caller applies the outcome to its cache entry

mod client;
mod error;

pub use client::{check_server, FetchOutcome, ProducerClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::FetchError;
