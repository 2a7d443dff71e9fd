//! # Matrix Scheduler / 矩阵调度器
//!
//! Runs every cell of an expanded matrix with bounded concurrency and collects
//! exactly one `JobResult` per cell, in expansion order. A red cell never stops
//! its siblings; only Ctrl-C or the matrix deadline cancels outstanding jobs.
//!
//! 以有界并发运行展开后矩阵的每个单元，并按展开顺序为每个单元收集恰好一个 `JobResult`。
//! 失败的单元不会停止其他单元；只有 Ctrl-C 或矩阵截止时间会取消未完成的作业。

use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::{
    config::Settings,
    execution::{run_job, JobContext, JobTracker},
    models::{ErrorKind, JobOutcome, JobResult, MatrixCell},
    provisioner::ServerProvisioner,
    suite::SuiteRunner,
};

pub struct MatrixScheduler<P, R> {
    provisioner: Arc<P>,
    runner: Arc<R>,
    settings: Settings,
}

impl<P, R> MatrixScheduler<P, R>
where
    P: ServerProvisioner,
    R: SuiteRunner,
{
    pub fn new(settings: Settings, provisioner: Arc<P>, runner: Arc<R>) -> Self {
        Self {
            provisioner,
            runner,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Executes all `cells` and returns their results in the order given.
    ///
    /// At most `concurrency_limit` jobs are in flight at once. A job whose
    /// task panics is recorded as `Errored(Panicked)`. Cancelling `stop`
    /// (or reaching the matrix deadline) ends running jobs with
    /// `Errored(Cancelled)` and records every job not yet started the same way.
    pub async fn run_all(&self, cells: Vec<MatrixCell>, stop: CancellationToken) -> Vec<JobResult> {
        let cancel = stop.child_token();
        let deadline = spawn_deadline(self.settings.matrix_timeout(), cancel.clone());

        let ctx = Arc::new(JobContext {
            job_timeout: self.settings.job_timeout(),
            artifacts_dir: self.settings.artifacts_dir.clone(),
            cancel: cancel.clone(),
        });
        let limit = self.settings.concurrency_limit.max(1);

        let jobs = cells.into_iter().enumerate().map(|(position, cell)| {
            let provisioner = Arc::clone(&self.provisioner);
            let runner = Arc::clone(&self.runner);
            let ctx = Arc::clone(&ctx);
            async move {
                let fallback = cell.clone();
                let handle = tokio::spawn(async move {
                    run_job(cell, provisioner.as_ref(), runner.as_ref(), ctx.as_ref()).await
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(cell = %fallback, error = %e, "job task did not complete");
                        let message = if e.is_panic() {
                            "job task panicked".to_string()
                        } else {
                            e.to_string()
                        };
                        JobTracker::new(fallback).finish(
                            JobOutcome::errored(ErrorKind::Panicked, message),
                            Duration::ZERO,
                            String::new(),
                        )
                    }
                };
                (position, result)
            }
        });

        let mut results: Vec<(usize, JobResult)> = stream::iter(jobs)
            .buffer_unordered(limit)
            .collect()
            .await;

        deadline.abort();
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

fn spawn_deadline(limit: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(limit) => {
                warn!(?limit, "matrix deadline reached, cancelling outstanding jobs");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}
