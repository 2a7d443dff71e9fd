//! # Reporting Unit Tests / 报告模块单元测试
//!
//! Covers the JSON and HTML reports and the directory coverage sink.
//!
//! 覆盖 JSON 和 HTML 报告以及目录覆盖率接收端。

mod common;

use common::*;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use xmpp_e2e_matrix::core::aggregator::aggregate;
use xmpp_e2e_matrix::core::models::{CoverageBlob, ErrorKind, JobOutcome, JobResult, JobState, MatrixCell, Mode, SuiteReport};
use xmpp_e2e_matrix::reporting::coverage::MANIFEST_FILE;
use xmpp_e2e_matrix::reporting::{
    generate_html_report, publish_best_effort, write_json_report, DirectoryCoverageSink,
};

fn result(cell: MatrixCell, outcome: JobOutcome) -> JobResult {
    JobResult {
        states: vec![JobState::Pending, outcome.state()],
        cell,
        outcome,
        duration: Duration::from_millis(1500),
        output: "suite output line\n".to_string(),
    }
}

fn mixed_results() -> Vec<JobResult> {
    let cells = reference_cells();
    vec![
        result(cells[0].clone(), JobOutcome::Passed(SuiteReport::passed(counts(10, 0, 0, 2)))),
        result(cells[1].clone(), JobOutcome::errored(ErrorKind::Timeout, "not ready after 30s")),
        result(cells[2].clone(), JobOutcome::Failed(SuiteReport::failed(counts(10, 1, 0, 0)))),
        result(
            cells[3].clone(),
            JobOutcome::Passed(
                SuiteReport::passed(counts(10, 0, 0, 0)).with_coverage(CoverageBlob(b"cov-3".to_vec())),
            ),
        ),
    ]
}

#[test]
fn test_json_report_carries_verdict_and_jobs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("report.json");
    let results = mixed_results();
    let aggregate = aggregate(&results).unwrap();

    write_json_report(&aggregate, &results, &path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["passed"], false);
    assert_eq!(json["exit_code"], 1);
    assert_eq!(json["cells"].as_array().unwrap().len(), 4);
    assert_eq!(json["jobs"].as_array().unwrap().len(), 4);
    assert_eq!(json["cells"][1]["error_kind"], "Timeout");
    assert!(json["generated_at"].is_string());
}

#[test]
fn test_html_report_lists_every_cell() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("report.html");
    let results = mixed_results();
    let aggregate = aggregate(&results).unwrap();

    generate_html_report(&aggregate, &results, &path, "en").unwrap();

    let html = fs::read_to_string(&path).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    for result in &results {
        assert!(html.contains(&result.cell.label()));
    }
    assert!(html.contains("suite output line"));
}

#[tokio::test]
async fn test_directory_sink_writes_blobs_and_manifest_in_order() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("coverage");
    let artifacts = {
        let results = vec![
            result(
                cell(1, "3.7", "0.9", Mode::CoverageOnly),
                JobOutcome::Passed(SuiteReport::passed(counts(1, 0, 0, 0)).with_coverage(CoverageBlob(vec![2]))),
            ),
            result(
                cell(0, "3.6", "0.9", Mode::CoverageOnly),
                JobOutcome::Passed(SuiteReport::passed(counts(1, 0, 0, 0)).with_coverage(CoverageBlob(vec![1]))),
            ),
        ];
        aggregate(&results).unwrap().coverage
    };

    let sink = DirectoryCoverageSink::new(&out, None);
    assert!(publish_best_effort(&sink, &artifacts).await);

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
    let files: Vec<&str> = manifest
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["file"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["00-3_6-0_9-coverage-only.cov", "01-3_7-0_9-coverage-only.cov"]);
    assert_eq!(fs::read(out.join(files[0])).unwrap(), vec![1]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_upload_command_runs_against_output_dir() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("coverage");
    let results = mixed_results();
    let artifacts = aggregate(&results).unwrap().coverage;

    let sink = DirectoryCoverageSink::new(&out, Some(format!("test -f {{dir}}/{MANIFEST_FILE}")));
    assert!(publish_best_effort(&sink, &artifacts).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_upload_is_reported_not_raised() {
    let dir = tempdir().unwrap();
    let results = mixed_results();
    let artifacts = aggregate(&results).unwrap().coverage;

    let sink = DirectoryCoverageSink::new(dir.path(), Some("false".to_string()));
    assert!(!publish_best_effort(&sink, &artifacts).await);
    // The blobs are still on disk.
    assert!(dir.path().join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_coverage_from_an_earlier_run_is_removed() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("coverage");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("07-3_5-0_8-coverage-only.cov"), b"stale").unwrap();
    fs::write(out.join("notes.txt"), b"keep me").unwrap();
    let artifacts = aggregate(&mixed_results()).unwrap().coverage;

    let sink = DirectoryCoverageSink::new(&out, None);
    assert!(publish_best_effort(&sink, &artifacts).await);

    let mut cov_files: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".cov"))
        .collect();
    cov_files.sort();
    assert_eq!(cov_files, vec!["03-3_6-0_10-coverage-only.cov"]);
    assert!(out.join("notes.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_hung_upload_is_abandoned_after_its_timeout() {
    let dir = tempdir().unwrap();
    let artifacts = aggregate(&mixed_results()).unwrap().coverage;

    let sink = DirectoryCoverageSink::new(dir.path(), Some("sleep 1000".to_string()))
        .with_upload_timeout(Duration::from_secs(1));
    let published = tokio::time::timeout(Duration::from_secs(10), publish_best_effort(&sink, &artifacts))
        .await
        .expect("upload was not abandoned");

    assert!(!published);
    assert!(dir.path().join(MANIFEST_FILE).exists());
}
