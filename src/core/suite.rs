//! # Suite Runner / 测试套件运行器
//!
//! Invokes the client library's test suite for one job and turns what it
//! leaves behind (a JSON report, a coverage file, an exit status) into a
//! `SuiteReport`. Failing tests are reported, never raised: only a suite that
//! could not be run at all is a `RunnerError`.
//!
//! 为单个作业调用客户端库的测试套件，并将其产物（JSON 报告、覆盖率文件、退出状态）
//! 转换为 `SuiteReport`。测试失败只作为报告返回，而不是错误：
//! 只有完全无法运行的套件才是 `RunnerError`。

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::config::SuiteConfig;
use crate::core::error::RunnerError;
use crate::core::models::{CoverageBlob, Endpoint, MatrixCell, SuiteReport, TestCounts};
use crate::infra::command::{build_command, render_template, spawn_and_capture_logged, tail};

/// Number of output lines kept in error messages.
const OUTPUT_TAIL_LINES: usize = 40;

/// File in the job directory that receives the suite output as it arrives.
pub const SUITE_LOG_FILE: &str = "suite.log";

/// What a runner gets to know about the job it runs.
#[derive(Debug, Clone, Copy)]
pub struct SuiteInvocation<'a> {
    pub cell: &'a MatrixCell,
    /// `None` for jobs that run without a server.
    pub endpoint: Option<&'a Endpoint>,
    pub coverage_enabled: bool,
    /// Per-job scratch directory for reports and coverage files.
    pub job_dir: &'a Path,
}

/// A finished suite invocation.
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub report: SuiteReport,
    /// Combined stdout and stderr of the suite.
    pub output: String,
}

pub trait SuiteRunner: Send + Sync + 'static {
    fn run(
        &self,
        invocation: SuiteInvocation<'_>,
    ) -> impl Future<Output = Result<SuiteRun, RunnerError>> + Send;
}

/// Runs the `[suite]` command of the configuration as a child process.
pub struct CommandSuiteRunner {
    config: SuiteConfig,
}

impl CommandSuiteRunner {
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    fn vars(&self, invocation: &SuiteInvocation<'_>) -> Vec<(&'static str, String)> {
        let cell = invocation.cell;
        let (host, port) = match invocation.endpoint {
            Some(endpoint) => (endpoint.host.clone(), endpoint.port.to_string()),
            None => (String::new(), String::new()),
        };
        let mut vars = vec![
            ("runtime", cell.runtime.clone()),
            ("server", cell.server.tag().to_string()),
            ("mode", cell.mode.as_str().to_string()),
            ("host", host),
            ("port", port),
            ("job_dir", invocation.job_dir.display().to_string()),
        ];
        let report = render_template(&self.config.report, &vars);
        let coverage_file = render_template(&self.config.coverage_file, &vars);
        vars.push(("report", report));
        vars.push(("coverage_file", coverage_file));
        vars
    }
}

impl SuiteRunner for CommandSuiteRunner {
    async fn run(&self, invocation: SuiteInvocation<'_>) -> Result<SuiteRun, RunnerError> {
        let vars = self.vars(&invocation);
        let lookup = |name: &str| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };
        let report_path = Some(lookup("report"))
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let coverage_path = Some(lookup("coverage_file"))
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let template = match (&self.config.coverage_command, invocation.coverage_enabled) {
            (Some(coverage_command), true) => coverage_command,
            _ => &self.config.command,
        };
        let (mut cmd, printable) = build_command(template, &vars)
            .map_err(|e| RunnerError::Infrastructure(format!("{e:#}")))?;

        cmd.current_dir(self.config.working_dir.as_deref().unwrap_or(invocation.job_dir))
            .envs(suite_env(&vars, invocation.coverage_enabled))
            .envs(&self.config.env);

        debug!(cell = %invocation.cell, command = %printable, "running suite");
        let log_path = invocation.job_dir.join(SUITE_LOG_FILE);
        let (status, output) = spawn_and_capture_logged(cmd, &log_path).await;
        let status = status.map_err(|e| {
            RunnerError::Infrastructure(format!("could not launch `{printable}`: {e}"))
        })?;

        let mut report = match &report_path {
            None if status.success() => SuiteReport::passed(TestCounts::default()),
            None => SuiteReport::failed(TestCounts::default()),
            Some(path) => read_report(path, &status.to_string(), &output).await?,
        };

        if report.passed && !status.success() {
            warn!(cell = %invocation.cell, %status, "suite reported success but exited abnormally");
            report.passed = false;
        }

        if invocation.coverage_enabled && report.coverage.is_none() {
            report.coverage = match &coverage_path {
                Some(path) => read_coverage(path).await,
                None => None,
            };
            if report.coverage.is_none() {
                warn!(cell = %invocation.cell, "coverage run produced no coverage data");
            }
        }

        Ok(SuiteRun { report, output })
    }
}

async fn read_report(path: &Path, status: &str, output: &str) -> Result<SuiteReport, RunnerError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            RunnerError::Infrastructure(format!(
                "unreadable report {}: {e}\n{}",
                path.display(),
                tail(output, OUTPUT_TAIL_LINES)
            ))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RunnerError::Infrastructure(format!(
            "suite exited with {status} without writing {}\n{}",
            path.display(),
            tail(output, OUTPUT_TAIL_LINES)
        ))),
        Err(e) => Err(RunnerError::Infrastructure(format!(
            "could not read report {}: {e}",
            path.display()
        ))),
    }
}

async fn read_coverage(path: &Path) -> Option<CoverageBlob> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(CoverageBlob(bytes)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no coverage file");
            None
        }
    }
}

fn suite_env(vars: &[(&str, String)], coverage_enabled: bool) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = vars
        .iter()
        // Host and port are only exported when the job has a server.
        .filter(|(name, value)| !(matches!(*name, "host" | "port") && value.is_empty()))
        .map(|(name, value)| {
            let key = match *name {
                "server" => "E2E_SERVER_VERSION".to_string(),
                other => format!("E2E_{}", other.to_ascii_uppercase()),
            };
            (key, value.clone())
        })
        .collect();
    env.push((
        "E2E_COVERAGE".to_string(),
        if coverage_enabled { "1" } else { "0" }.to_string(),
    ));
    env
}
