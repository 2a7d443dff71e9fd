//! # Coverage Sink / 覆盖率接收端
//!
//! Receives the coverage blobs of a run in job declaration order. Publishing is
//! best-effort: a failed upload is logged and never changes the verdict.
//!
//! 按作业声明顺序接收一次运行的覆盖率数据。发布是尽力而为的：
//! 上传失败只会被记录，绝不会改变结论。

use anyhow::{bail, Context, Result};
use colored::*;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::aggregator::CoverageArtifact;
use crate::infra::command::{build_command, spawn_and_capture, tail};
use crate::infra::t;

/// Name of the index written next to the coverage files.
pub const MANIFEST_FILE: &str = "manifest.json";

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub trait CoverageSink: Send + Sync {
    fn publish(&self, artifacts: &[CoverageArtifact]) -> impl Future<Output = Result<()>> + Send;
}

/// Writes every blob to `output_dir` as `<slug>.cov`, writes a manifest that
/// keeps their order, then runs the optional upload command.
///
/// Coverage files and the manifest left in `output_dir` by an earlier run are
/// removed first, so the upload only ever sees this run's blobs.
pub struct DirectoryCoverageSink {
    output_dir: PathBuf,
    upload: Option<String>,
    upload_timeout: Duration,
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    file: String,
    cell: String,
    runtime: &'a str,
    server: &'a str,
    bytes: usize,
}

impl DirectoryCoverageSink {
    pub fn new(output_dir: impl Into<PathBuf>, upload: Option<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            upload,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_upload_timeout(mut self, upload_timeout: Duration) -> Self {
        self.upload_timeout = upload_timeout;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write_files(&self, artifacts: &[CoverageArtifact]) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create coverage directory: {}", self.output_dir.display())
        })?;
        self.remove_stale_files()?;

        let mut manifest = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file = format!("{}.cov", artifact.cell.slug());
            let path = self.output_dir.join(&file);
            std::fs::write(&path, artifact.blob.as_bytes())
                .with_context(|| format!("Failed to write coverage file: {}", path.display()))?;
            manifest.push(ManifestEntry {
                file,
                cell: artifact.cell.label(),
                runtime: &artifact.cell.runtime,
                server: artifact.cell.server.tag(),
                bytes: artifact.blob.len(),
            });
        }

        let manifest_path = self.output_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&manifest_path, json)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))
    }
}

impl DirectoryCoverageSink {
    fn remove_stale_files(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.output_dir).with_context(|| {
            format!("Failed to read coverage directory: {}", self.output_dir.display())
        })?;
        for entry in entries {
            let path = entry?.path();
            let stale = path.is_file()
                && (path.extension().is_some_and(|ext| ext == "cov")
                    || path.file_name().is_some_and(|name| name == MANIFEST_FILE));
            if stale {
                debug!(path = %path.display(), "removing stale coverage file");
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove stale coverage file: {}", path.display()))?;
            }
        }
        Ok(())
    }
}

impl CoverageSink for DirectoryCoverageSink {
    async fn publish(&self, artifacts: &[CoverageArtifact]) -> Result<()> {
        self.write_files(artifacts)?;
        info!(dir = %self.output_dir.display(), files = artifacts.len(), "coverage written");

        let Some(upload) = &self.upload else {
            return Ok(());
        };
        let dir = self.output_dir.display().to_string();
        let (mut cmd, printable) = build_command(upload, &[("dir", dir.clone())])?;
        cmd.env("E2E_COVERAGE_DIR", &dir);

        let Ok((status, output)) = tokio::time::timeout(self.upload_timeout, spawn_and_capture(cmd)).await
        else {
            warn!(command = %printable, timeout = ?self.upload_timeout, "coverage upload timed out");
            bail!("`{}` did not finish within {:?}", printable, self.upload_timeout);
        };
        let status = status.with_context(|| format!("Failed to run `{printable}`"))?;
        if !status.success() {
            bail!("`{}` exited with {}\n{}", printable, status, tail(&output, 20));
        }
        Ok(())
    }
}

/// Publishes `artifacts`, logging instead of propagating any failure.
///
/// # Returns
/// Whether publishing succeeded.
pub async fn publish_best_effort<S: CoverageSink>(sink: &S, artifacts: &[CoverageArtifact]) -> bool {
    match sink.publish(artifacts).await {
        Ok(()) => {
            println!("{}", t!("coverage.published", count = artifacts.len()).green());
            true
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "coverage upload failed");
            println!("{}", t!("coverage.publish_failed", error = format!("{e:#}")).yellow());
            false
        }
    }
}
