//! # Data Models Module / 数据模型模块
//!
//! This module defines the data structures shared by the whole orchestrator:
//! matrix cells and their dimensions, suite reports, job states and outcomes.
//!
//! 此模块定义了整个编排器共享的数据结构：
//! 矩阵单元及其维度、套件报告、作业状态和结果。

use crate::infra::t;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The tag that selects the unstable development branch of a server.
pub const TRUNK_TAG: &str = "trunk";

/// How a matrix cell is exercised.
/// 矩阵单元的执行方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Run the suite against a live, freshly provisioned server.
    /// 针对新启动的真实服务器运行测试套件。
    #[serde(rename = "e2e")]
    EndToEnd,
    /// Run the suite purely to collect coverage. No server is provisioned and
    /// the cell does not gate the verdict.
    /// 仅为收集覆盖率而运行测试套件。不启动服务器，也不影响最终结论。
    #[serde(rename = "coverage-only")]
    CoverageOnly,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::EndToEnd => "e2e",
            Mode::CoverageOnly => "coverage-only",
        }
    }

    /// Whether a job in this mode needs a provisioned server.
    pub fn requires_server(self) -> bool {
        match self {
            Mode::EndToEnd => true,
            Mode::CoverageOnly => false,
        }
    }

    /// Whether the suite runs under coverage instrumentation in this mode.
    pub fn coverage_enabled(self) -> bool {
        match self {
            Mode::EndToEnd => false,
            Mode::CoverageOnly => true,
        }
    }

    /// Whether a job in this mode takes part in the pass/fail verdict.
    pub fn gates_verdict(self) -> bool {
        match self {
            Mode::EndToEnd => true,
            Mode::CoverageOnly => false,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server version selector: a pinned release tag or the moving `trunk`.
/// 服务器版本选择器：固定的发布标签或持续变化的 `trunk`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ServerVersion {
    Pinned(String),
    Trunk,
}

impl ServerVersion {
    /// Parses a version tag as written in the configuration file.
    pub fn parse(tag: &str) -> Result<Self, String> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err("server version tag must not be empty".to_string());
        }
        if tag.eq_ignore_ascii_case(TRUNK_TAG) {
            Ok(ServerVersion::Trunk)
        } else {
            Ok(ServerVersion::Pinned(tag.to_string()))
        }
    }

    /// The tag handed to the provisioner and to command templates.
    pub fn tag(&self) -> &str {
        match self {
            ServerVersion::Pinned(tag) => tag,
            ServerVersion::Trunk => TRUNK_TAG,
        }
    }

    pub fn is_trunk(&self) -> bool {
        matches!(self, ServerVersion::Trunk)
    }
}

impl TryFrom<String> for ServerVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ServerVersion::parse(&value)
    }
}

impl From<ServerVersion> for String {
    fn from(value: ServerVersion) -> Self {
        value.tag().to_string()
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One concrete runtime / server-version / mode combination.
/// `index` is the cell's position in the deterministic expansion order and is
/// preserved through sharding, so reports always line up with `plan` output.
///
/// 一个具体的运行时 / 服务器版本 / 模式组合。
/// `index` 是该单元在确定性展开顺序中的位置，分片后依然保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixCell {
    pub index: usize,
    pub runtime: String,
    pub server: ServerVersion,
    pub mode: Mode,
}

impl MatrixCell {
    pub fn new(index: usize, runtime: impl Into<String>, server: ServerVersion, mode: Mode) -> Self {
        Self {
            index,
            runtime: runtime.into(),
            server,
            mode,
        }
    }

    /// Human readable label, e.g. `3.6 / 0.10 / e2e`.
    pub fn label(&self) -> String {
        format!("{} / {} / {}", self.runtime, self.server, self.mode)
    }

    /// A file system safe identifier, unique within one expansion.
    pub fn slug(&self) -> String {
        let raw = format!(
            "{:02}-{}-{}-{}",
            self.index, self.runtime, self.server, self.mode
        );
        raw.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }

    /// Two cells describe the same combination regardless of their position.
    pub fn same_combination(&self, other: &MatrixCell) -> bool {
        self.runtime == other.runtime && self.server == other.server && self.mode == other.mode
    }
}

impl fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Network address of a ready server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-suite test counters.
/// 每个套件的测试计数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
}

impl TestCounts {
    pub fn passed(&self) -> u32 {
        self.total
            .saturating_sub(self.failed)
            .saturating_sub(self.errored)
            .saturating_sub(self.skipped)
    }

    /// Adds `other` into `self`, saturating at `u32::MAX`.
    pub fn add(&mut self, other: &TestCounts) {
        self.total = self.total.saturating_add(other.total);
        self.failed = self.failed.saturating_add(other.failed);
        self.errored = self.errored.saturating_add(other.errored);
        self.skipped = self.skipped.saturating_add(other.skipped);
    }
}

/// Coverage data produced by the external coverage tool. Never interpreted.
/// 外部覆盖率工具生成的数据，从不解析。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageBlob(pub Vec<u8>);

impl CoverageBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CoverageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoverageBlob({} bytes)", self.0.len())
    }
}

/// The structured result of one suite invocation. Failing tests are reported
/// here with `passed = false`; they are data, not errors.
///
/// 单次套件调用的结构化结果。测试失败以 `passed = false` 的形式报告，属于数据而非错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub passed: bool,
    /// Optional on the wire so that a malformed report can be represented and
    /// rejected by the aggregator.
    #[serde(default)]
    pub counts: Option<TestCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageBlob>,
}

impl SuiteReport {
    pub fn passed(counts: TestCounts) -> Self {
        Self {
            passed: true,
            counts: Some(counts),
            coverage: None,
        }
    }

    pub fn failed(counts: TestCounts) -> Self {
        Self {
            passed: false,
            counts: Some(counts),
            coverage: None,
        }
    }

    pub fn with_coverage(mut self, coverage: CoverageBlob) -> Self {
        self.coverage = Some(coverage);
        self
    }

    /// Describes why this report cannot be trusted for a verdict, if it can't.
    pub fn structural_problem(&self) -> Option<String> {
        let counts = match &self.counts {
            Some(counts) => counts,
            None => return Some("report carries no test counts".to_string()),
        };
        let accounted = counts.failed as u64 + counts.errored as u64 + counts.skipped as u64;
        if accounted > counts.total as u64 {
            return Some(format!(
                "failed + errored + skipped ({}) exceeds total ({})",
                accounted, counts.total
            ));
        }
        if self.passed && (counts.failed > 0 || counts.errored > 0) {
            return Some(format!(
                "report claims success with {} failed and {} errored tests",
                counts.failed, counts.errored
            ));
        }
        None
    }
}

/// Why a job ended in the `Errored` state.
/// 作业以 `Errored` 状态结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The server did not become ready within its readiness budget.
    Timeout,
    /// The server version could not be fetched or built.
    DownloadFailed,
    /// The server process could not be started or died before becoming ready.
    StartFailed,
    /// The suite could not be invoked at all.
    Infrastructure,
    /// The job exceeded its timeout, hit the matrix deadline or was interrupted.
    Cancelled,
    /// The job's task panicked.
    Panicked,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Timeout",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::StartFailed => "StartFailed",
            ErrorKind::Infrastructure => "Infrastructure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Panicked => "Panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a job.
/// 作业的生命周期。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Provisioning,
    Running,
    Passed,
    Failed,
    Errored,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Passed | JobState::Failed | JobState::Errored)
    }

    /// Legal edges of the job state machine. Any live state may fall into
    /// `Errored`; `Provisioning` is skipped by jobs that need no server.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, Provisioning) | (Pending, Running) => true,
            (Provisioning, Running) => true,
            (Running, Passed) | (Running, Failed) => true,
            (from, Errored) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The terminal outcome of one job.
/// 单个作业的最终结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Passed(SuiteReport),
    Failed(SuiteReport),
    Errored { kind: ErrorKind, message: String },
}

impl JobOutcome {
    /// Maps a suite report onto the passed/failed outcomes.
    pub fn from_report(report: SuiteReport) -> Self {
        if report.passed {
            JobOutcome::Passed(report)
        } else {
            JobOutcome::Failed(report)
        }
    }

    pub fn errored(kind: ErrorKind, message: impl Into<String>) -> Self {
        JobOutcome::Errored {
            kind,
            message: message.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Passed(_) => JobState::Passed,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::Errored { .. } => JobState::Errored,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, JobOutcome::Passed(_))
    }

    pub fn report(&self) -> Option<&SuiteReport> {
        match self {
            JobOutcome::Passed(report) | JobOutcome::Failed(report) => Some(report),
            JobOutcome::Errored { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            JobOutcome::Errored { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Short reason shown next to a red cell in summaries.
    pub fn reason(&self) -> Option<String> {
        match self {
            JobOutcome::Passed(_) => None,
            JobOutcome::Failed(report) => Some(match report.counts {
                Some(counts) => format!(
                    "{} failed, {} errored of {}",
                    counts.failed, counts.errored, counts.total
                ),
                None => "suite reported failure".to_string(),
            }),
            JobOutcome::Errored { kind, message } => Some(format!("{}: {}", kind, message)),
        }
    }
}

/// Everything recorded about one finished job.
/// 单个已完成作业的全部记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub cell: MatrixCell,
    pub outcome: JobOutcome,
    pub duration: Duration,
    /// Every state the job went through, starting with `Pending`.
    pub states: Vec<JobState>,
    /// Captured suite output (tail), kept for failure details.
    #[serde(default)]
    pub output: String,
}

impl JobResult {
    pub fn final_state(&self) -> JobState {
        self.outcome.state()
    }

    pub fn gates_verdict(&self) -> bool {
        self.cell.mode.gates_verdict()
    }

    /// A failure that turns the matrix red.
    pub fn is_gating_failure(&self) -> bool {
        self.gates_verdict() && !self.outcome.is_passed()
    }

    /// Gets the status of the job as a localized string for display.
    /// 以本地化字符串形式获取作业状态以供显示。
    pub fn get_status_str(&self, locale: &str) -> String {
        match &self.outcome {
            JobOutcome::Passed(_) => t!("report.status_passed", locale = locale).to_string(),
            JobOutcome::Failed(_) => t!("report.status_failed", locale = locale).to_string(),
            JobOutcome::Errored { .. } => t!("report.status_errored", locale = locale).to_string(),
        }
    }

    /// Gets the appropriate CSS class for the job status.
    pub fn get_status_class(&self) -> &'static str {
        match &self.outcome {
            JobOutcome::Passed(_) => "status-passed",
            JobOutcome::Failed(_) if !self.gates_verdict() => "status-informational",
            JobOutcome::Errored { .. } if !self.gates_verdict() => "status-informational",
            JobOutcome::Failed(_) => "status-failed",
            JobOutcome::Errored { kind, .. } if *kind == ErrorKind::Cancelled => "status-cancelled",
            JobOutcome::Errored { .. } => "status-errored",
        }
    }
}
