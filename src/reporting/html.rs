//! # HTML Reporting Module / HTML 报告模块
//!
//! Renders a self-contained HTML page with the matrix verdict, test totals and
//! one row per cell, including the captured output of red cells.
//!
//! 渲染一个自包含的 HTML 页面，包含矩阵结论、测试总数以及每个单元一行，
//! 其中包括失败单元捕获的输出。

use anyhow::{Context, Result};
use maud::{html, Markup, PreEscaped, DOCTYPE};
use std::fs;
use std::path::Path;

use crate::core::aggregator::AggregateResult;
use crate::core::models::JobResult;
use crate::infra::t;

const HTML_STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2rem; color: #24292f; }
h1 { margin-bottom: 0.25rem; }
.verdict { font-size: 1.25rem; font-weight: bold; margin-bottom: 1.5rem; }
.verdict.passed { color: #1a7f37; }
.verdict.failed { color: #cf222e; }
.summary-container { display: flex; gap: 2rem; margin-bottom: 1.5rem; }
.summary-item { display: flex; flex-direction: column; }
.summary-item .count { font-size: 1.5rem; font-weight: bold; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 0.4rem 0.6rem; border-bottom: 1px solid #d0d7de; vertical-align: top; }
.status-cell { font-weight: bold; }
.status-passed { color: #1a7f37; }
.status-failed, .status-errored { color: #cf222e; }
.status-cancelled { color: #9a6700; }
.status-informational { color: #57606a; }
details pre { background: #f6f8fa; padding: 0.75rem; overflow-x: auto; max-height: 30rem; }
"#;

/// Writes the HTML report for a finished run to `output_path`.
///
/// # Arguments / 参数
/// * `aggregate` - The matrix verdict
/// * `results` - Per-cell results, in expansion order
/// * `output_path` - Where the report is written
/// * `locale` - The locale used for labels
pub fn generate_html_report(
    aggregate: &AggregateResult,
    results: &[JobResult],
    output_path: &Path,
    locale: &str,
) -> Result<()> {
    let page = render(aggregate, results, locale);
    fs::write(output_path, page.into_string())
        .with_context(|| format!("Failed to write HTML report to {}", output_path.display()))
}

fn render(aggregate: &AggregateResult, results: &[JobResult], locale: &str) -> Markup {
    let totals = &aggregate.totals;
    let (verdict_class, verdict_text) = if aggregate.passed {
        ("passed", t!("html_report.verdict_passed", locale = locale))
    } else {
        ("failed", t!("html_report.verdict_failed", locale = locale))
    };

    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { (t!("html_report.title", locale = locale)) }
                style { (PreEscaped(HTML_STYLE)) }
            }
            body {
                h1 { (t!("html_report.main_header", locale = locale)) }
                div class={ "verdict " (verdict_class) } { (verdict_text) }
                div class="summary-container" {
                    (summary_item(results.len(), &t!("html_report.summary.cells", locale = locale)))
                    (summary_item(totals.total as usize, &t!("html_report.summary.total", locale = locale)))
                    (summary_item(totals.passed() as usize, &t!("html_report.summary.passed", locale = locale)))
                    (summary_item((totals.failed + totals.errored) as usize, &t!("html_report.summary.failed", locale = locale)))
                    (summary_item(totals.skipped as usize, &t!("html_report.summary.skipped", locale = locale)))
                }
                table {
                    thead {
                        tr {
                            th { (t!("html_report.table.header.cell", locale = locale)) }
                            th { (t!("html_report.table.header.status", locale = locale)) }
                            th { (t!("html_report.table.header.duration", locale = locale)) }
                            th { (t!("html_report.table.header.details", locale = locale)) }
                        }
                    }
                    tbody {
                        @for result in results {
                            tr {
                                td { (result.cell.label()) }
                                td {
                                    div class={ "status-cell " (result.get_status_class()) } {
                                        (result.get_status_str(locale))
                                    }
                                }
                                td { (format!("{:.2}s", result.duration.as_secs_f64())) }
                                td {
                                    @if let Some(reason) = result.outcome.reason() {
                                        div { (reason) }
                                    }
                                    @if !result.outcome.is_passed() && !result.output.trim().is_empty() {
                                        details {
                                            summary { (t!("html_report.toggle_output", locale = locale)) }
                                            pre { (result.output) }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn summary_item(count: usize, label: &str) -> Markup {
    html! {
        div class="summary-item" {
            span class="count" { (count) }
            span class="label" { (label) }
        }
    }
}
