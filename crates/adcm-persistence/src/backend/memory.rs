//! Volatile backend keeping the last saved graph in memory

use parking_lot::Mutex;

use super::GraphPersistence;
use crate::graph::Graph;

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<Graph>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphPersistence for MemoryPersistence {
    fn load(&self) -> anyhow::Result<Option<Graph>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, graph: &Graph) -> anyhow::Result<()> {
        *self.saved.lock() = Some(graph.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
