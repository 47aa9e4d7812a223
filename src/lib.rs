//! syndic Producer
//!
//! Stores categorized content and publishes it to Replicas through
//! conditional HTTP endpoints.

pub mod config;
pub mod content;
pub mod server;
