//! # Console Reporting Module / 控制台报告模块
//!
//! This module prints the execution plan, the per-cell summary table, the
//! matrix verdict and the details of red cells to the console, with
//! internationalization support.
//!
//! 此模块在控制台打印执行计划、逐单元摘要表、矩阵结论以及失败单元的详细信息，支持国际化。

use colored::*;

use crate::core::aggregator::{AggregateResult, CellSummary};
use crate::core::models::{JobResult, JobState};
use crate::core::planner::ExecutionPlan;
use crate::infra::t;

/// Prints the cells a run (or `plan`) will execute, in expansion order.
///
/// # Output Format / 输出格式
/// ```text
/// --- Execution Plan ---
///   [00] 3.6 / 0.10 / e2e
///   [01] 3.6 / trunk / e2e
///   [02] 3.7 / 0.10 / coverage-only  (informational)
/// ```
pub fn print_plan(plan: &ExecutionPlan, locale: &str) {
    println!("\n{}", t!("plan.banner", locale = locale).bold());
    if plan.is_distributed {
        println!(
            "{}",
            t!("plan.shard_info", locale = locale, selected = plan.cells.len(), total = plan.total_cells).cyan()
        );
    }
    for cell in &plan.cells {
        let note = if cell.mode.gates_verdict() {
            String::new()
        } else {
            format!("  ({})", t!("report.informational", locale = locale))
        };
        println!("  [{:02}] {}{}", cell.index, cell.label(), note.dimmed());
    }
    println!(
        "{}",
        t!(
            "plan.counts",
            locale = locale,
            e2e = plan.end_to_end_count(),
            coverage = plan.coverage_only_count()
        )
    );
}

/// Prints a formatted summary of the matrix followed by the verdict banner.
///
/// 打印矩阵的格式化摘要，随后打印结论横幅。
///
/// # Output Format / 输出格式
/// ```text
/// --- Matrix Summary ---
///   - Passed        | 3.6 / 0.10 / e2e                 |   12.31s | 40 tests, 2 skipped
///   - Errored       | 3.6 / trunk / e2e                |    5.02s | Timeout: server trunk ...
/// ```
pub fn print_summary(result: &AggregateResult, locale: &str) {
    println!("\n{}", t!("summary.banner", locale = locale).bold());

    for cell in &result.cells {
        let status = status_text(cell, locale);
        let detail = match (&cell.reason, &cell.counts) {
            (Some(reason), _) => first_line(reason).to_string(),
            (None, Some(counts)) => t!(
                "summary.counts",
                locale = locale,
                total = counts.total,
                skipped = counts.skipped
            )
            .to_string(),
            (None, None) => String::new(),
        };
        println!(
            "  - {:<14} | {:<36} | {:>8} | {}",
            status,
            cell.cell.label(),
            format!("{:.2}s", cell.duration.as_secs_f64()),
            detail
        );
    }

    let totals = &result.totals;
    println!(
        "\n{}",
        t!(
            "summary.totals",
            locale = locale,
            total = totals.total,
            passed = totals.passed(),
            failed = totals.failed,
            errored = totals.errored,
            skipped = totals.skipped
        )
    );

    let informational = result.informational_failures().count();
    if informational > 0 {
        println!(
            "{}",
            t!("summary.informational_failures", locale = locale, count = informational).yellow()
        );
    }

    if result.passed {
        println!("\n{}", t!("summary.matrix_passed", locale = locale).green().bold());
    } else {
        let red = result.gating_failures().count();
        println!(
            "\n{}",
            t!("summary.matrix_failed", locale = locale, count = red).red().bold()
        );
    }
}

fn status_text(cell: &CellSummary, locale: &str) -> ColoredString {
    let text = match cell.state {
        JobState::Passed => t!("report.status_passed", locale = locale),
        JobState::Failed => t!("report.status_failed", locale = locale),
        _ => t!("report.status_errored", locale = locale),
    };
    match (cell.state, cell.gating) {
        (JobState::Passed, _) => text.green(),
        (_, false) => text.yellow(),
        _ => text.red(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Prints the reason and captured output of every red cell.
///
/// 打印每个失败单元的原因和捕获的输出。
pub fn print_failure_details(failures: &[&JobResult], locale: &str) {
    if failures.is_empty() {
        return;
    }

    println!("\n{}", t!("summary.failure_banner", locale = locale).red().bold());
    println!("{}", "-".repeat(80));

    for (i, result) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}'",
            i + 1,
            failures.len(),
            result.get_status_str(locale).red(),
            result.cell.label().cyan()
        );
        if let Some(reason) = result.outcome.reason() {
            println!("{}", reason);
        }
        if !result.output.trim().is_empty() {
            println!("\n--- {} ---\n", t!("summary.suite_log", locale = locale).yellow());
            println!("{}", result.output.trim_end());
        }
        println!("\n{}", "-".repeat(80));
    }
}
