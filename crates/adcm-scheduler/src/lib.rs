//! ADCM Scheduler - Running bundle actions
//!
//! This crate provides:
//! - Run request checks and task/job creation
//! - The per-task loop with the shared task/job state machine
//! - Internal scripts (`bundle_switch`, `bundle_revert`, `hc_apply`)
//! - Job manifests and inventories written for the external runner
//! - Cancellation, restore-on-fail and recovery of unfinished tasks

pub mod internal;
pub mod manifest;
pub mod metrics;
pub mod prepare;
pub mod request;
pub mod runner;
pub mod scheduler;

pub use manifest::{JobContext, JobManifest};
pub use prepare::{TaskOrigin, prepare_task};
pub use request::{RunActionRequest, RunPayload, RunTarget};
pub use runner::{ExternalCommandRunner, JobControl, JobLaunch, JobRunner};
pub use scheduler::{Scheduler, settle_task};
