//! Configuration management for the adcm command
//!
//! Sources, lowest priority first: `conf/adcm.yml`, `ADCM_*` environment
//! variables, the plain layout variables (`RUN_DIR`, `BUNDLE_DIR`, ...),
//! then command line overrides.

use std::path::{Path, PathBuf};

use adcm_common::{AdcmPaths, SecretVault};
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, Environment, File, Map};

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/adcm.yml";
pub const DEFAULT_DATA_DIR: &str = "/adcm/data";
pub const DEFAULT_RUNNER_COMMAND: &str = "adcm-runner";

/// Plain variables of the deployment layout and the config keys they set
const LAYOUT_VARIABLES: [(&str, &str); 6] = [
    ("RUN_DIR", "run.dir"),
    ("BUNDLE_DIR", "bundle.dir"),
    ("DOWNLOAD_DIR", "download.dir"),
    ("TMP_DIR", "tmp.dir"),
    ("FILE_DIR", "file.dir"),
    ("ENCODING_UTF_8", "encoding"),
];

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "adcm", version, about = "Cluster orchestration engine")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "ADCM_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Base directory of the engine state
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create the directory layout and an empty state snapshot
    Init,
    /// Migrate the state snapshot to the current schema
    Upgrade,
    /// Load a bundle from its YAML or JSON manifest
    LoadBundle { path: PathBuf },
    /// Resume an unfinished task
    RunTask { id: u64 },
}

/// Application configuration loaded from the config file and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load with the process environment
    pub fn load(file: &Path, data_dir: Option<&Path>) -> anyhow::Result<Self> {
        Self::from_sources(file, std::env::vars().collect(), data_dir)
    }

    /// Load with an explicit environment; a missing file is skipped
    pub fn from_sources(
        file: &Path,
        env: Map<String, String>,
        data_dir: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix("ADCM")
                    .separator("_")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            );
        for (variable, key) in LAYOUT_VARIABLES {
            builder = builder.set_override_option(key, env.get(variable).cloned())?;
        }
        if let Some(dir) = data_dir {
            builder = builder.set_override("data.dir", dir.display().to_string())?;
        }
        let config = builder
            .build()
            .with_context(|| format!("failed to build configuration from {}", file.display()))?;
        Ok(Self { config })
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.config.get_string(key).ok().map(PathBuf::from)
    }

    // ========================================================================
    // Layout
    // ========================================================================

    pub fn data_dir(&self) -> PathBuf {
        self.path("data.dir")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn run_dir(&self) -> PathBuf {
        self.path("run.dir").unwrap_or_else(|| self.data_dir().join("run"))
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.path("bundle.dir")
            .unwrap_or_else(|| self.data_dir().join("bundles"))
    }

    pub fn state_file(&self) -> PathBuf {
        self.path("state.file")
            .unwrap_or_else(|| self.data_dir().join("state.json"))
    }

    /// Directory layout handed to the engine
    pub fn paths(&self) -> AdcmPaths {
        let mut paths = AdcmPaths::under(self.data_dir());
        paths.run_dir = self.run_dir();
        paths.bundle_dir = self.bundle_dir();
        if let Some(dir) = self.path("download.dir") {
            paths.download_dir = dir;
        }
        if let Some(dir) = self.path("tmp.dir") {
            paths.tmp_dir = dir;
        }
        if let Some(dir) = self.path("file.dir") {
            paths.file_dir = dir;
        }
        if let Ok(encoding) = self.config.get_string("encoding") {
            paths.encoding = encoding;
        }
        paths
    }

    // ========================================================================
    // Secrets and runner
    // ========================================================================

    pub fn secret_key(&self) -> Option<String> {
        self.config
            .get_string("secret.key")
            .ok()
            .filter(|key| !key.is_empty())
    }

    /// Vault keyed by `ADCM_SECRET_KEY`
    pub fn vault(&self) -> anyhow::Result<SecretVault> {
        let key = self
            .secret_key()
            .context("secret key is not configured, set ADCM_SECRET_KEY")?;
        Ok(SecretVault::from_secret(&key)?)
    }

    pub fn runner_command(&self) -> String {
        self.config
            .get_string("runner.command")
            .unwrap_or(DEFAULT_RUNNER_COMMAND.to_string())
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.path("log.dir").unwrap_or_else(|| self.data_dir().join("log")),
            self.config.get_bool("log.console").unwrap_or(true),
            self.config.get_bool("log.file").unwrap_or(true),
            &self.config.get_string("log.level").unwrap_or("info".to_string()),
        )
    }
}
