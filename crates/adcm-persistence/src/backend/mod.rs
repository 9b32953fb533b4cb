//! Snapshot persistence backends
//!
//! The store commits a whole graph at a time; a backend only has to load the
//! last committed graph and save a new one atomically.

mod file;
mod memory;

pub use file::FileSnapshotPersistence;
pub use memory::MemoryPersistence;

use crate::graph::Graph;

/// Durable home of the object graph
pub trait GraphPersistence: Send + Sync {
    /// Last committed graph, `None` when nothing was ever saved
    fn load(&self) -> anyhow::Result<Option<Graph>>;

    /// Replace the stored graph
    fn save(&self, graph: &Graph) -> anyhow::Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}
