//! File-based logging with one file per engine component.
//!
//! | Log File      | Component                           | Target Prefixes                          |
//! |---------------|-------------------------------------|------------------------------------------|
//! | adcm.log      | Root logger (all components)        | (all)                                    |
//! | core.log      | Object graph, concerns, configs     | adcm_core, adcm_config, adcm_persistence |
//! | scheduler.log | Tasks, jobs and inventories         | adcm_scheduler, adcm_inventory           |
//! | plugin.log    | Ansible plugin calls                | adcm_plugin                              |
//! | audit.log     | Audit records                       | adcm_audit                               |
//!
//! Log files are stored in `<data dir>/log` unless `log.dir` says otherwise.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Internal definition for a component log file.
struct ComponentLogDef {
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "core.log",
        targets: &["adcm_core", "adcm_config", "adcm_persistence"],
    },
    ComponentLogDef {
        file_name: "scheduler.log",
        targets: &["adcm_scheduler", "adcm_inventory"],
    },
    ComponentLogDef {
        file_name: "plugin.log",
        targets: &["adcm_plugin"],
    },
    ComponentLogDef {
        file_name: "audit.log",
        targets: &["adcm_audit"],
    },
];

// ---------------------------------------------------------------------------
// Log rotation policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Single file
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/adcm/data/log"),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from application configuration; an unknown level falls back to INFO.
    pub fn from_config(log_dir: PathBuf, console_output: bool, file_logging: bool, level: &str) -> Self {
        let level = level.parse().unwrap_or(Level::INFO);
        Self {
            log_dir,
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging guard
// ---------------------------------------------------------------------------

/// Keeps the non-blocking file writers alive.
///
/// Dropping it flushes buffered log output, so `main` holds it until exit.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initialize console and multi-file logging.
///
/// `RUST_LOG` overrides the configured level of the console and of `adcm.log`.
/// Component files use per-layer [`Targets`] filters to route events by
/// their tracing target.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, "adcm.log");
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let level: LevelFilter = config.file_level.into();
            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, level);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::debug!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}
