//! Machine-readable run report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::core::aggregator::AggregateResult;
use crate::core::models::JobResult;

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    exit_code: u8,
    #[serde(flatten)]
    aggregate: &'a AggregateResult,
    jobs: &'a [JobResult],
}

/// Serializes the verdict and every job result to `output_path` as pretty JSON.
pub fn write_json_report(aggregate: &AggregateResult, results: &[JobResult], output_path: &Path) -> Result<()> {
    let report = JsonReport {
        generated_at: Utc::now(),
        exit_code: aggregate.exit_code(),
        aggregate,
        jobs: results,
    };
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize JSON report")?;
    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))
}
