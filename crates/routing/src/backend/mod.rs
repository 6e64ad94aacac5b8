//! Backend adapter abstractions.
//!
//! This module contains:
//! - The `DataBackend` trait that every adapter implements
//! - `BackendReply`, the successful outcome of an adapter call
//! - `BackendFactory`, the lazily-invoked constructor stored in the registry
//!
//! # Architecture
//!
//! The backend system is designed to be:
//! - **Backend-agnostic**: The registry and router never branch on a concrete adapter type
//! - **Extensible**: New backends are added by implementing `DataBackend` and registering
//!   a descriptor with a factory
//! - **Resilient**: Adapter errors, timeouts and panics are all converted to failure
//!   responses by the router

mod traits;

pub use traits::{shared_factory, BackendFactory, BackendReply, DataBackend};
