//! # Matrix Configuration / 矩阵配置
//!
//! The immutable `MatrixConfig` value is loaded once from TOML and handed to
//! the orchestrator at construction; nothing in the core reads ambient CI
//! state.
//!
//! 不可变的 `MatrixConfig` 从 TOML 加载一次，并在构造时传入编排器；
//! 核心逻辑不读取任何 CI 环境状态。

use crate::core::models::{MatrixCell, Mode, ServerVersion};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The default file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "E2EMatrix.toml";

/// The whole configuration file.
/// 完整的配置文件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// The language for the runner's output messages (e.g., "en", "zh-CN").
    /// Falls back to system locale detection when absent.
    ///
    /// 运行器输出消息的语言（例如 "en", "zh-CN"）。未指定时使用系统语言检测。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    pub matrix: MatrixSpec,

    #[serde(default)]
    pub settings: Settings,

    /// Required as soon as the matrix contains an end-to-end cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    pub suite: SuiteConfig,

    #[serde(default)]
    pub coverage: CoverageConfig,
}

/// The declared matrix dimensions.
/// 声明的矩阵维度。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub runtimes: Vec<String>,
    pub servers: Vec<ServerVersion>,
    #[serde(default = "default_modes")]
    pub modes: Vec<Mode>,
    /// Extra cells appended after the cartesian product, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<CellSpec>,
    /// Filters removing cells from the cartesian product.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<CellFilter>,
}

fn default_modes() -> Vec<Mode> {
    vec![Mode::EndToEnd]
}

/// A fully specified extra cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSpec {
    pub runtime: String,
    pub server: ServerVersion,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

fn default_mode() -> Mode {
    Mode::EndToEnd
}

/// A partial cell; omitted fields match every value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
}

impl CellFilter {
    pub fn matches(&self, cell: &MatrixCell) -> bool {
        self.runtime.as_ref().is_none_or(|r| *r == cell.runtime)
            && self.server.as_ref().is_none_or(|s| *s == cell.server)
            && self.mode.is_none_or(|m| m == cell.mode)
    }
}

/// Global scheduling settings.
/// 全局调度设置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of jobs in flight. `1` means strictly sequential.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Hard wall-clock budget of a single job.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Deadline of the whole matrix run.
    #[serde(default = "default_matrix_timeout_secs")]
    pub matrix_timeout_secs: u64,
    /// When set, scratch and server directories of red jobs are copied here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            job_timeout_secs: default_job_timeout_secs(),
            matrix_timeout_secs: default_matrix_timeout_secs(),
            artifacts_dir: None,
        }
    }
}

impl Settings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn matrix_timeout(&self) -> Duration {
        Duration::from_secs(self.matrix_timeout_secs)
    }
}

fn default_concurrency_limit() -> usize {
    1
}
fn default_job_timeout_secs() -> u64 {
    1800
}
fn default_matrix_timeout_secs() -> u64 {
    14_400
}

/// How server instances are fetched, started and checked for readiness.
/// 服务器实例的获取、启动和探测方式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Optional command that downloads or builds `{version}` into `{workdir}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<String>,
    /// Long-running command that serves on `{host}:{port}`.
    pub start: String,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,
}

impl ServerConfig {
    /// A configuration with every optional knob at its default.
    pub fn with_start(start: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            fetch: None,
            start: start.into(),
            ready_timeout_secs: default_ready_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            teardown_timeout_secs: default_teardown_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ready_timeout_secs() -> u64 {
    30
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    2000
}
fn default_fetch_timeout_secs() -> u64 {
    600
}
fn default_teardown_timeout_secs() -> u64 {
    10
}

/// How the client library's suite is invoked.
/// 客户端库测试套件的调用方式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub command: String,
    /// Used instead of `command` when the job runs under coverage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Where the suite writes its JSON report. An empty string disables the
    /// report file and the verdict is taken from the exit status.
    #[serde(default = "default_report")]
    pub report: String,
    #[serde(default = "default_coverage_file")]
    pub coverage_file: String,
    /// Extra environment for the suite process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl SuiteConfig {
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            coverage_command: None,
            working_dir: None,
            report: default_report(),
            coverage_file: default_coverage_file(),
            env: BTreeMap::new(),
        }
    }
}

fn default_report() -> String {
    "{job_dir}/report.json".to_string()
}
fn default_coverage_file() -> String {
    "{job_dir}/coverage.dat".to_string()
}

/// Where merged coverage goes.
/// 合并后覆盖率的去向。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Best-effort upload command run after the blobs are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<String>,
    /// The upload is abandoned after this long.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            upload: None,
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl CoverageConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn default_upload_timeout_secs() -> u64 {
    300
}

/// Upper bound for every `*_timeout_secs` setting (one week).
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

impl MatrixConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MatrixConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the orchestrator cannot run.
    pub fn validate(&self) -> Result<()> {
        let matrix = &self.matrix;
        if matrix.runtimes.is_empty() {
            bail!("matrix.runtimes must list at least one runtime");
        }
        if matrix.runtimes.iter().any(|r| r.trim().is_empty()) {
            bail!("matrix.runtimes must not contain empty entries");
        }
        if matrix.servers.is_empty() {
            bail!("matrix.servers must list at least one server version");
        }
        if matrix.modes.is_empty() {
            bail!("matrix.modes must list at least one mode");
        }
        if matrix.include.iter().any(|c| c.runtime.trim().is_empty()) {
            bail!("matrix.include entries must name a runtime");
        }

        let settings = &self.settings;
        if settings.concurrency_limit == 0 {
            bail!("settings.concurrency_limit must be at least 1");
        }
        if settings.job_timeout_secs == 0 || settings.matrix_timeout_secs == 0 {
            bail!("settings timeouts must be greater than zero");
        }
        check_timeout_cap("settings.job_timeout_secs", settings.job_timeout_secs)?;
        check_timeout_cap("settings.matrix_timeout_secs", settings.matrix_timeout_secs)?;

        if self.coverage.upload_timeout_secs == 0 {
            bail!("coverage.upload_timeout_secs must be greater than zero");
        }
        check_timeout_cap("coverage.upload_timeout_secs", self.coverage.upload_timeout_secs)?;

        if self.suite.command.trim().is_empty() {
            bail!("suite.command must not be empty");
        }

        match &self.server {
            Some(server) => {
                if server.start.trim().is_empty() {
                    bail!("server.start must not be empty");
                }
                if server.host.trim().is_empty() {
                    bail!("server.host must not be empty");
                }
                if server.ready_timeout_secs == 0
                    || server.fetch_timeout_secs == 0
                    || server.teardown_timeout_secs == 0
                {
                    bail!("server timeouts must be greater than zero");
                }
                check_timeout_cap("server.ready_timeout_secs", server.ready_timeout_secs)?;
                check_timeout_cap("server.fetch_timeout_secs", server.fetch_timeout_secs)?;
                check_timeout_cap("server.teardown_timeout_secs", server.teardown_timeout_secs)?;
                if server.max_backoff_ms > MAX_TIMEOUT_SECS * 1000 {
                    bail!("server.max_backoff_ms must not exceed {} ms", MAX_TIMEOUT_SECS * 1000);
                }
                if server.initial_backoff_ms == 0 || server.initial_backoff_ms > server.max_backoff_ms {
                    bail!("server.initial_backoff_ms must be positive and not exceed server.max_backoff_ms");
                }
            }
            None if self.declares_end_to_end() => {
                bail!("the matrix contains e2e cells but no [server] section is configured");
            }
            None => {}
        }

        Ok(())
    }

    /// Non-fatal oddities worth telling the user about.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let servers = &self.matrix.servers;
        if !servers.iter().any(ServerVersion::is_trunk) {
            warnings.push("matrix.servers has no \"trunk\" entry; unreleased server changes are not covered".to_string());
        }
        if !servers.iter().any(|s| !s.is_trunk()) {
            warnings.push("matrix.servers has no pinned release tag; results are not reproducible".to_string());
        }
        let cpus = num_cpus::get();
        if self.settings.concurrency_limit > cpus {
            warnings.push(format!(
                "settings.concurrency_limit ({}) exceeds the number of CPUs ({})",
                self.settings.concurrency_limit, cpus
            ));
        }
        warnings
    }

    fn declares_end_to_end(&self) -> bool {
        self.matrix.modes.contains(&Mode::EndToEnd)
            || self.matrix.include.iter().any(|c| c.mode == Mode::EndToEnd)
    }
}

fn check_timeout_cap(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_TIMEOUT_SECS {
        bail!("{name} must not exceed {MAX_TIMEOUT_SECS} seconds");
    }
    Ok(())
}

/// Loads and validates the matrix configuration at `path`.
pub fn load_matrix_config(path: &Path) -> Result<MatrixConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    MatrixConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}
