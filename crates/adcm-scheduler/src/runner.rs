//! Runner seam
//!
//! The scheduler never executes scripts itself. A [`JobRunner`] receives the
//! job directory prepared for it and reports how the job ended.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use adcm_persistence::{JobId, JobStatus, ScriptType, TaskId};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a runner needs to start one job
#[derive(Clone, Debug)]
pub struct JobLaunch {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub name: String,
    pub script: String,
    pub script_type: ScriptType,
    pub params: Value,
    pub verbose: bool,
    /// `run/<job_id>/`
    pub job_dir: PathBuf,
    pub config_path: PathBuf,
    pub inventory_path: PathBuf,
    /// Content directory of the bundle the script comes from
    pub bundle_dir: PathBuf,
}

/// Cancellation signal and pid sink of a running job
#[derive(Clone)]
pub struct JobControl {
    cancel: watch::Receiver<bool>,
    pid: Arc<dyn Fn(u32) + Send + Sync>,
}

impl JobControl {
    pub fn new(cancel: watch::Receiver<bool>, pid: Arc<dyn Fn(u32) + Send + Sync>) -> Self {
        Self { cancel, pid }
    }

    /// Control that is never cancelled and drops pids
    pub fn detached() -> Self {
        let (_, cancel) = watch::channel(false);
        Self::new(cancel, Arc::new(|_| {}))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the job is cancelled; never resolves for detached controls
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel.borrow_and_update() {
                return;
            }
            if self.cancel.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn report_pid(&self, pid: u32) {
        (self.pid)(pid)
    }
}

impl std::fmt::Debug for JobControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobControl")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// External job runner
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run a job to its end; returns `Success`, `Failed` or `Aborted`
    async fn run(&self, launch: &JobLaunch, control: JobControl) -> anyhow::Result<JobStatus>;
}

/// Runs a configured command with the job directory as its last argument
///
/// The exit code decides the job status; stdout and stderr go to
/// `<job_dir>/runner-stdout.txt` and `<job_dir>/runner-stderr.txt`.
#[derive(Clone, Debug)]
pub struct ExternalCommandRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalCommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a whitespace separated command line such as `ansible-runner-wrapper --quiet`
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    fn command(&self, launch: &JobLaunch) -> anyhow::Result<Command> {
        let stdout = std::fs::File::create(launch.job_dir.join("runner-stdout.txt"))
            .context("failed to create runner stdout file")?;
        let stderr = std::fs::File::create(launch.job_dir.join("runner-stderr.txt"))
            .context("failed to create runner stderr file")?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&launch.job_dir)
            .current_dir(&launch.job_dir)
            .env("ADCM_TASK_ID", launch.task_id.to_string())
            .env("ADCM_JOB_ID", launch.job_id.to_string())
            .env("ADCM_SCRIPT", &launch.script)
            .env("ADCM_CONFIG", &launch.config_path)
            .env("ADCM_INVENTORY", &launch.inventory_path)
            .env("ADCM_BUNDLE_DIR", &launch.bundle_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl JobRunner for ExternalCommandRunner {
    async fn run(&self, launch: &JobLaunch, mut control: JobControl) -> anyhow::Result<JobStatus> {
        let mut child = self
            .command(launch)?
            .spawn()
            .with_context(|| format!("failed to start runner {}", self.program.display()))?;
        if let Some(pid) = child.id() {
            control.report_pid(pid);
        }
        debug!(job_id = %launch.job_id, pid = ?child.id(), script = %launch.script, "Runner started");

        tokio::select! {
            status = child.wait() => {
                let status = status.context("failed to wait for runner")?;
                if status.success() {
                    Ok(JobStatus::Success)
                } else {
                    info!(job_id = %launch.job_id, code = ?status.code(), "Runner reported failure");
                    Ok(JobStatus::Failed)
                }
            }
            _ = control.cancelled() => {
                warn!(job_id = %launch.job_id, "Terminating runner");
                child.kill().await.context("failed to terminate runner")?;
                Ok(JobStatus::Aborted)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn launch(dir: &std::path::Path) -> JobLaunch {
        JobLaunch {
            task_id: TaskId(1),
            job_id: JobId(2),
            name: "install".to_string(),
            script: "install.yaml".to_string(),
            script_type: ScriptType::Ansible,
            params: Value::Null,
            verbose: false,
            job_dir: dir.to_path_buf(),
            config_path: dir.join("config.json"),
            inventory_path: dir.join("inventory.json"),
            bundle_dir: dir.to_path_buf(),
        }
    }

    fn shell(script: &str) -> ExternalCommandRunner {
        ExternalCommandRunner::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_exit_code_decides_status() {
        let dir = tempfile::tempdir().unwrap();
        let ok = shell("echo \"$ADCM_JOB_ID\"")
            .run(&launch(dir.path()), JobControl::detached())
            .await
            .unwrap();
        assert_eq!(ok, JobStatus::Success);
        let stdout = std::fs::read_to_string(dir.path().join("runner-stdout.txt")).unwrap();
        assert_eq!(stdout.trim(), "2");

        let failed = shell("exit 3")
            .run(&launch(dir.path()), JobControl::detached())
            .await
            .unwrap();
        assert_eq!(failed, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let pid = Arc::new(AtomicU32::new(0));
        let seen = pid.clone();
        let control = JobControl::new(rx, Arc::new(move |p| seen.store(p, Ordering::SeqCst)));

        let launch = launch(dir.path());
        let handle = tokio::spawn(async move { shell("sleep 30").run(&launch, control).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Aborted);
        assert_ne!(pid.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ExternalCommandRunner::new(dir.path().join("no-such-runner"));
        assert!(runner.run(&launch(dir.path()), JobControl::detached()).await.is_err());
    }

    #[test]
    fn test_command_line_parsing() {
        assert!(ExternalCommandRunner::from_command_line("  ").is_none());
        let runner = ExternalCommandRunner::from_command_line("wrapper --quiet -v").unwrap();
        assert_eq!(runner.program, PathBuf::from("wrapper"));
        assert_eq!(runner.args, vec!["--quiet", "-v"]);
    }
}
