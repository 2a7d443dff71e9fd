//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides the isolated scratch directories used by jobs and
//! servers, and preservation of those directories when a job goes red.
//!
//! 此模块提供作业和服务器使用的隔离临时目录，并在作业失败时保留这些目录。

use anyhow::{Context, Result};
use fs_extra::dir::{copy, CopyOptions};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Where a red job's scratch directory goes inside its artifacts directory.
pub const JOB_ARTIFACTS: &str = "job";
/// Where the server working directory goes inside a job's artifacts directory.
pub const SERVER_ARTIFACTS: &str = "server";

/// Creates a unique, temporary directory whose name starts with a readable
/// prefix derived from `label`. The directory is removed when the returned
/// guard is dropped.
///
/// # Arguments
/// * `kind` - What the directory is for, e.g. "job" or "server"
/// * `label` - Free-form label, sanitized into the directory name
pub fn create_scratch_dir(kind: &str, label: &str) -> Result<TempDir> {
    let sanitized_label = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();

    tempfile::Builder::new()
        .prefix(&format!("xmpp_e2e_{kind}_{sanitized_label}_"))
        .tempdir()
        .with_context(|| format!("Failed to create temporary {kind} directory"))
}

/// Copies the entire content of `from` into `to`, replacing whatever was
/// there before.
///
/// # Arguments
/// * `from` - Source directory path
/// * `to` - Destination directory path, created if missing
pub fn preserve_dir(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        fs::remove_dir_all(to).with_context(|| {
            format!("Failed to clean up old artifacts directory: {}", to.display())
        })?;
    }
    fs::create_dir_all(to)
        .with_context(|| format!("Failed to create artifacts directory: {}", to.display()))?;

    let mut options = CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;
    copy(from, to, &options).with_context(|| {
        format!("Failed to copy {} to {}", from.display(), to.display())
    })?;
    Ok(())
}

