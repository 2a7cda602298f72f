//! Nexus: a Zanzibar-style relationship-based authorization engine.
//!
//! This crate is the public facade: namespace and tuple stores, a
//! Permission Engine dispatching across consistency modes over the Graph
//! Evaluator, the three-level permission cache, and the Tiger bitmap
//! cache, with the Invalidation Fabric keeping all of them coherent.
//! Construct a [`NexusEngine`] via [`NexusEngine::connect`] and use its
//! `namespaces`/`tuples`/`permissions` handles.

pub mod config;
pub mod error;
pub mod namespace_store;
pub mod nexus;
pub mod permission_engine;
pub mod refresh;
pub mod tuple_store;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use namespace_store::NamespaceStore;
pub use nexus::NexusEngine;
pub use permission_engine::{CheckRequest, PermissionEngine};
pub use refresh::RefreshTokenGuard;
pub use tuple_store::TupleStore;

/// Initializes a `tracing-subscriber` `fmt` layer reading `RUST_LOG`
/// (falling back to `info`). Call once at process start; safe to skip
/// entirely if the embedding process already installed its own
/// subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
