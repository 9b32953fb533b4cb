//! Advisory lock on a job's `config.json`
//!
//! A playbook running against several hosts may call the same plugin
//! concurrently; every invocation holds an exclusive lock on the job's
//! manifest for its whole duration, so calls from one job are serialised.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Exclusive lock released on drop
#[derive(Debug)]
pub struct JobFileLock {
    file: File,
    path: PathBuf,
}

impl JobFileLock {
    /// Block until the lock on `path` is ours
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        file.lock()?;
        debug!(path = %path.display(), "Job config locked");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobFileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to unlock job config");
        }
    }
}
