//! File-based snapshot persistence
//!
//! The graph is written as JSON next to its final location and renamed into
//! place, so a crash leaves either the old or the new snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::GraphPersistence;
use crate::graph::Graph;

#[derive(Debug, Clone)]
pub struct FileSnapshotPersistence {
    path: PathBuf,
}

impl FileSnapshotPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl GraphPersistence for FileSnapshotPersistence {
    fn load(&self) -> anyhow::Result<Option<Graph>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Read snapshot {}", self.path.display()))?;
        let graph = serde_json::from_slice(&bytes)
            .with_context(|| format!("Parse snapshot {}", self.path.display()))?;
        Ok(Some(graph))
    }

    fn save(&self, graph: &Graph) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Create dir {}", parent.display()))?;
        }
        let json = serde_json::to_vec(graph).context("Serialize snapshot")?;
        let temp = self.temp_path();
        fs::write(&temp, json).with_context(|| format!("Write file {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Rename {} into place", temp.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
