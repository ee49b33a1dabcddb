//! Pluggable Storage Module
//!
//! The entry engine never touches bytes directly; it talks to a
//! [`engine::StorageEngine`] per DMap partition.
//!
//! ## Core Concepts
//! - **Engine contract**: put/get/delete/scan plus a name and stats.
//! - **Registry**: engines are selected by name from a registry of constructors,
//!   configured through a free-form map.
//! - **Default engine**: `kvstore`, a `DashMap`-backed in-memory store.

pub mod engine;
pub mod kvstore;
pub mod registry;

pub use engine::{EngineConfigMap, EngineStats, StorageEngine, StorageError};
pub use registry::EngineRegistry;

#[cfg(test)]
mod tests;
