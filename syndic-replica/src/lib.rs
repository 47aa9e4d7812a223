//! syndic Replica
//!
//! Pulls resources from a Producer on a schedule, keeps them in a local
//! cache with HTTP validator semantics and optionally mirrors items and
//! their media into durable local entities.

pub mod cache_store;
pub mod config;
pub mod db;
pub mod engine;
pub mod mirror;
pub mod scheduler;

pub use cache_store::{CacheStoreError, ReplicaCacheStore, SchedulerState};
pub use config::{Config, ConfigError, ConfigSource, ConfigValue, ResourceConfig};
pub use engine::{CycleMode, CycleReport, EngineError, EngineSettings, KeyOutcome, SyncEngine};
pub use mirror::{LocalMirror, MediaMirror, MirrorError};
pub use scheduler::Scheduler;
