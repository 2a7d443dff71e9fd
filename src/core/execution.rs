//! # Job Execution Engine Module / 作业执行引擎模块
//!
//! Runs one matrix cell from `Pending` to a terminal state: provision a server
//! when the mode needs one, run the suite against it, and release the server
//! on every exit path (success, failure, error, job timeout, cancellation).
//! Job-level errors never escape; they become an `Errored` outcome.
//!
//! 将一个矩阵单元从 `Pending` 运行到终止状态：在模式需要时启动服务器，
//! 针对它运行套件，并在每条退出路径（成功、失败、错误、作业超时、取消）上释放服务器。
//! 作业级错误不会向外传播，而是变成 `Errored` 结果。

use colored::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    core::{
        models::{ErrorKind, JobOutcome, JobResult, JobState, MatrixCell},
        provisioner::{ServerHandle, ServerProvisioner},
        suite::{SuiteInvocation, SuiteRunner, SUITE_LOG_FILE},
    },
    infra::{
        command::tail,
        fs::{create_scratch_dir, preserve_dir, JOB_ARTIFACTS, SERVER_ARTIFACTS},
        t,
    },
};

/// Lines of suite output kept on the job result.
const KEPT_OUTPUT_LINES: usize = 200;

/// Per-job settings shared by every job of a run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_timeout: Duration,
    /// Where the scratch directories of red jobs are copied, if anywhere.
    pub artifacts_dir: Option<PathBuf>,
    /// Cancelled on Ctrl-C or when the matrix deadline passes.
    pub cancel: CancellationToken,
}

/// Tracks the state machine of a single job.
#[derive(Debug)]
pub struct JobTracker {
    cell: MatrixCell,
    states: Vec<JobState>,
}

impl JobTracker {
    pub fn new(cell: MatrixCell) -> Self {
        Self {
            cell,
            states: vec![JobState::Pending],
        }
    }

    pub fn current(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Pending)
    }

    /// Moves to `next` if the edge is legal. Illegal edges are logged and
    /// ignored so that a misbehaving collaborator cannot corrupt the history.
    pub fn advance(&mut self, next: JobState) {
        let current = self.current();
        if current.can_transition_to(next) {
            info!(cell = %self.cell, from = %current, to = %next, "job state changed");
            self.states.push(next);
        } else {
            warn!(cell = %self.cell, from = %current, to = %next, "ignoring illegal job state transition");
        }
    }

    pub fn states(&self) -> &[JobState] {
        &self.states
    }

    pub fn finish(mut self, outcome: JobOutcome, duration: Duration, output: String) -> JobResult {
        self.advance(outcome.state());
        JobResult {
            cell: self.cell,
            outcome,
            duration,
            states: self.states,
            output,
        }
    }
}

/// The main entry point for running a single matrix cell.
///
/// The server handle lives in a slot owned by this function, outside the
/// timed and cancellable part, so it is released exactly once however that
/// part ends.
///
/// # Returns
/// A `JobResult` in a terminal state. This function never fails.
pub async fn run_job<P, R>(cell: MatrixCell, provisioner: &P, runner: &R, ctx: &JobContext) -> JobResult
where
    P: ServerProvisioner,
    R: SuiteRunner,
{
    let started = Instant::now();
    let label = cell.label();
    let mut tracker = JobTracker::new(cell.clone());

    if ctx.cancel.is_cancelled() {
        return tracker.finish(
            JobOutcome::errored(ErrorKind::Cancelled, t!("run.job_not_started").to_string()),
            Duration::ZERO,
            String::new(),
        );
    }

    println!("{}", t!("run.job_starting", name = &label).blue());

    let job_dir = match create_scratch_dir("job", &cell.slug()) {
        Ok(dir) => dir,
        Err(e) => {
            let outcome = JobOutcome::errored(ErrorKind::Infrastructure, format!("{e:#}"));
            return report_finished(tracker.finish(outcome, started.elapsed(), String::new()));
        }
    };

    let mut slot: Option<ServerHandle> = None;
    // `None` output means the work was interrupted before the suite returned.
    let (outcome, output) = {
        let work = drive(&mut tracker, provisioner, runner, &mut slot, job_dir.path());
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => (
                JobOutcome::errored(ErrorKind::Cancelled, t!("run.job_cancelled").to_string()),
                None,
            ),
            finished = tokio::time::timeout(ctx.job_timeout, work) => match finished {
                Ok((outcome, output)) => (outcome, Some(output)),
                Err(_) => (
                    JobOutcome::errored(
                        ErrorKind::Cancelled,
                        t!("run.job_timeout", timeout = ctx.job_timeout.as_secs()).to_string(),
                    ),
                    None,
                ),
            },
        }
    };
    let output = output.unwrap_or_else(|| partial_output(job_dir.path()));
    let mut output = tail(&output, KEPT_OUTPUT_LINES);

    if !outcome.is_passed() {
        if let Some(artifacts_dir) = &ctx.artifacts_dir {
            let target = preserve_artifacts(artifacts_dir, &cell, job_dir.path(), slot.as_ref());
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&t!("run.artifacts_kept", path = target.display()));
        }
    }

    if let Some(mut handle) = slot.take() {
        provisioner.release(&mut handle).await;
    }

    report_finished(tracker.finish(outcome, started.elapsed(), output))
}

/// Whatever the suite wrote before it was interrupted.
fn partial_output(job_dir: &Path) -> String {
    std::fs::read(job_dir.join(SUITE_LOG_FILE))
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Provision (when needed) and run the suite. Everything here may be dropped
/// midway by a timeout or cancellation.
async fn drive<P, R>(
    tracker: &mut JobTracker,
    provisioner: &P,
    runner: &R,
    slot: &mut Option<ServerHandle>,
    job_dir: &Path,
) -> (JobOutcome, String)
where
    P: ServerProvisioner,
    R: SuiteRunner,
{
    let cell = tracker.cell.clone();

    if cell.mode.requires_server() {
        tracker.advance(JobState::Provisioning);
        match provisioner.provision(&cell).await {
            Ok(handle) => *slot = Some(handle),
            Err(e) => return (JobOutcome::errored(e.kind(), e.to_string()), String::new()),
        }
    }

    tracker.advance(JobState::Running);
    let endpoint = slot.as_ref().map(|handle| handle.endpoint().clone());
    let invocation = SuiteInvocation {
        cell: &cell,
        endpoint: endpoint.as_ref(),
        coverage_enabled: cell.mode.coverage_enabled(),
        job_dir,
    };

    match runner.run(invocation).await {
        Ok(run) => (JobOutcome::from_report(run.report), run.output),
        Err(e) => (JobOutcome::errored(e.kind(), e.to_string()), String::new()),
    }
}

/// Copies the job directory and the server working directory of a red job.
///
/// # Returns
/// The cell's artifacts directory.
fn preserve_artifacts(
    artifacts_dir: &Path,
    cell: &MatrixCell,
    job_dir: &Path,
    server: Option<&ServerHandle>,
) -> PathBuf {
    let target = artifacts_dir.join(cell.slug());
    if let Err(e) = preserve_dir(job_dir, &target.join(JOB_ARTIFACTS)) {
        warn!(cell = %cell, error = %e, "failed to preserve job directory");
    }
    if let Some(workdir) = server.and_then(ServerHandle::workdir) {
        if let Err(e) = preserve_dir(workdir, &target.join(SERVER_ARTIFACTS)) {
            warn!(cell = %cell, error = %e, "failed to preserve server directory");
        }
    }
    target
}

fn report_finished(result: JobResult) -> JobResult {
    let label = result.cell.label();
    let duration = format!("{:.2}", result.duration.as_secs_f64());
    match &result.outcome {
        JobOutcome::Passed(_) => {
            println!("{}", t!("run.job_passed", name = &label, duration = &duration).green())
        }
        JobOutcome::Failed(_) if !result.gates_verdict() => {
            println!("{}", t!("run.job_informational", name = &label, duration = &duration).yellow())
        }
        JobOutcome::Failed(_) => {
            println!("{}", t!("run.job_failed", name = &label, duration = &duration).red())
        }
        JobOutcome::Errored { kind, message } => println!(
            "{}",
            t!("run.job_errored", name = &label, kind = kind.as_str(), message = message).red()
        ),
    }
    result
}
