//! Filesystem layout handed to the engine
//!
//! - `bundles/<hash>/` immutable bundle content
//! - `run/<job_id>/` job-local manifest (`config.json`, `inventory.json`)
//! - `data/<task_id>/` task working directory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Resolved directory layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdcmPaths {
    pub run_dir: PathBuf,
    pub bundle_dir: PathBuf,
    pub download_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub file_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Text encoding used when writing manifests
    pub encoding: String,
}

impl AdcmPaths {
    /// Layout rooted at a single base directory
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            run_dir: base.join("run"),
            bundle_dir: base.join("bundles"),
            download_dir: base.join("download"),
            tmp_dir: base.join("tmp"),
            file_dir: base.join("file"),
            data_dir: base.join("data"),
            encoding: "utf-8".to_string(),
        }
    }

    /// Job-local directory holding `config.json` and `inventory.json`
    pub fn job_dir(&self, job_id: u64) -> PathBuf {
        self.run_dir.join(job_id.to_string())
    }

    /// Job context manifest consumed by plugins
    pub fn job_config(&self, job_id: u64) -> PathBuf {
        self.job_dir(job_id).join("config.json")
    }

    /// Inventory consumed by the runner
    pub fn job_inventory(&self, job_id: u64) -> PathBuf {
        self.job_dir(job_id).join("inventory.json")
    }

    /// Task working directory
    pub fn task_data_dir(&self, task_id: u64) -> PathBuf {
        self.data_dir.join(task_id.to_string())
    }

    /// Bundle content directory
    pub fn bundle_path(&self, hash: &str) -> PathBuf {
        self.bundle_dir.join(hash)
    }

    /// Every directory the engine expects to exist
    pub fn all_dirs(&self) -> [&Path; 6] {
        [
            &self.run_dir,
            &self.bundle_dir,
            &self.download_dir,
            &self.tmp_dir,
            &self.file_dir,
            &self.data_dir,
        ]
    }
}

impl Default for AdcmPaths {
    fn default() -> Self {
        Self::under("/adcm/data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = AdcmPaths::under("/srv/adcm");
        assert_eq!(paths.job_config(12), PathBuf::from("/srv/adcm/run/12/config.json"));
        assert_eq!(
            paths.job_inventory(12),
            PathBuf::from("/srv/adcm/run/12/inventory.json")
        );
        assert_eq!(paths.task_data_dir(3), PathBuf::from("/srv/adcm/data/3"));
        assert_eq!(paths.bundle_path("ab12"), PathBuf::from("/srv/adcm/bundles/ab12"));
        assert_eq!(paths.all_dirs().len(), 6);
    }
}
