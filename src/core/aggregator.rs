//! # Result Aggregator / 结果聚合器
//!
//! Folds the per-cell results of a run into the single matrix verdict and the
//! ordered list of coverage blobs. The matrix passes only when every gating
//! (end-to-end) cell passed; coverage-only cells are informational.
//!
//! 将一次运行的各单元结果合并为唯一的矩阵结论以及有序的覆盖率数据列表。
//! 只有当每个参与判定的（端到端）单元都通过时矩阵才算通过；仅覆盖率单元只作参考。

use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::core::{
    error::AggregationError,
    models::{CoverageBlob, ErrorKind, JobResult, JobState, MatrixCell, TestCounts},
};

/// Exit status of a green matrix.
pub const EXIT_PASSED: u8 = 0;
/// Exit status of a red matrix.
pub const EXIT_FAILED: u8 = 1;

/// One row of the summary.
#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    pub cell: MatrixCell,
    pub state: JobState,
    pub gating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<TestCounts>,
    pub duration: Duration,
}

impl CellSummary {
    pub fn is_red(&self) -> bool {
        self.state != JobState::Passed
    }
}

/// Coverage produced by one cell, kept in job declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageArtifact {
    pub cell: MatrixCell,
    #[serde(skip)]
    pub blob: CoverageBlob,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub passed: bool,
    pub cells: Vec<CellSummary>,
    #[serde(skip)]
    pub coverage: Vec<CoverageArtifact>,
    /// Test counters summed over every report that carried counts.
    pub totals: TestCounts,
}

impl AggregateResult {
    pub fn exit_code(&self) -> u8 {
        if self.passed { EXIT_PASSED } else { EXIT_FAILED }
    }

    /// Gating cells that turned the matrix red.
    pub fn gating_failures(&self) -> impl Iterator<Item = &CellSummary> {
        self.cells.iter().filter(|c| c.gating && c.is_red())
    }

    /// Informational cells that did not pass.
    pub fn informational_failures(&self) -> impl Iterator<Item = &CellSummary> {
        self.cells.iter().filter(|c| !c.gating && c.is_red())
    }
}

/// Computes the matrix verdict.
///
/// Results are ordered by expansion index first, so coverage is merged in job
/// declaration order whatever order the jobs finished in.
///
/// # Errors
/// `AggregationError::MalformedReport` when a gating cell's report is
/// internally inconsistent. Such a report is never counted as a pass.
pub fn aggregate(results: &[JobResult]) -> Result<AggregateResult, AggregationError> {
    let mut ordered: Vec<&JobResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.cell.index);

    let mut passed = true;
    let mut cells = Vec::with_capacity(ordered.len());
    let mut coverage = Vec::new();
    let mut totals = TestCounts::default();

    for result in ordered {
        let gating = result.gates_verdict();
        let report = result.outcome.report();

        if let Some(problem) = report.and_then(|r| r.structural_problem()) {
            if gating {
                return Err(AggregationError::MalformedReport {
                    cell: result.cell.label(),
                    problem,
                });
            }
            warn!(cell = %result.cell, %problem, "ignoring malformed report of informational cell");
        }

        if gating && !result.outcome.is_passed() {
            passed = false;
        }

        if let Some(counts) = report.and_then(|r| r.counts.as_ref()) {
            totals.add(counts);
        }
        if let Some(blob) = report.and_then(|r| r.coverage.as_ref()) {
            coverage.push(CoverageArtifact {
                cell: result.cell.clone(),
                blob: blob.clone(),
            });
        }

        cells.push(CellSummary {
            cell: result.cell.clone(),
            state: result.final_state(),
            gating,
            error_kind: result.outcome.error_kind(),
            reason: result.outcome.reason(),
            counts: report.and_then(|r| r.counts),
            duration: result.duration,
        });
    }

    Ok(AggregateResult {
        passed,
        cells,
        coverage,
        totals,
    })
}
