//! Capability registry module.
//!
//! This module provides backend discovery and ranking, including:
//! - Backend registration with descriptor validation
//! - Category / feature discovery with AND semantics on hard requirements
//! - Weighted quality scoring and deterministic ranking
//! - Lazy adapter instantiation

mod capability_registry;
pub mod scoring;
mod validator;

pub use capability_registry::CapabilityRegistry;
pub use scoring::RankCriteria;
pub use validator::validate_descriptor;
