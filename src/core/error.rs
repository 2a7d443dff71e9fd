//! # Error Taxonomy / 错误分类
//!
//! Job-scoped errors (`ProvisionError`, `RunnerError`) are caught at the job
//! boundary and turned into an `Errored` outcome. `AggregationError` is the
//! only error allowed to end a run abnormally.
//!
//! 作业范围的错误（`ProvisionError`、`RunnerError`）在作业边界被捕获并转换为 `Errored` 结果。
//! `AggregationError` 是唯一允许异常终止整个运行的错误。

use crate::core::models::ErrorKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("server {version} was not ready on {address} after {waited:?} ({attempts} attempts)\n{log_tail}")]
    Timeout {
        version: String,
        address: String,
        waited: Duration,
        attempts: u32,
        /// Last lines of `server.log`.
        log_tail: String,
    },

    #[error("failed to fetch server {version}: {reason}")]
    DownloadFailed { version: String, reason: String },

    #[error("failed to start server {version}: {reason}")]
    StartFailed { version: String, reason: String },
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::Timeout { .. } => ErrorKind::Timeout,
            ProvisionError::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            ProvisionError::StartFailed { .. } => ErrorKind::StartFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("suite could not be run: {0}")]
    Infrastructure(String),
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("malformed report for required cell '{cell}': {problem}")]
    MalformedReport { cell: String, problem: String },
}
