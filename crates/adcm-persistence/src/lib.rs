//! ADCM Persistence - Object graph entities and the transactional store
//!
//! This crate provides:
//! - Entity definitions (prototypes, objects, configs, concerns, tasks)
//! - The arena-style `Graph` addressed by typed ids
//! - `Store`: serialised clone-and-swap transactions with snapshot reads
//! - Snapshot persistence backends (memory, JSON file)

pub mod backend;
pub mod graph;
pub mod model;
pub mod store;

pub use backend::{FileSnapshotPersistence, GraphPersistence, MemoryPersistence};
pub use graph::{Graph, SCHEMA_VERSION};
pub use model::*;
pub use store::Store;
