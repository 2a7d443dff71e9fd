//! # Run Command Module / 运行命令模块
//!
//! This module implements the `run` command: it loads the matrix
//! configuration, expands and shards the matrix, runs every cell through the
//! scheduler, then reports the verdict and hands coverage to the sink.
//!
//! 此模块实现 `run` 命令：加载矩阵配置，展开并分片矩阵，
//! 通过调度器运行每个单元，然后报告结论并将覆盖率交给接收端。

use anyhow::{Context, Result};
use colored::*;
use std::{fs, path::Path, path::PathBuf, process::ExitCode, sync::Arc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    cli::EXIT_AGGREGATION_ERROR,
    core::{
        aggregator::{aggregate, AggregateResult},
        config::{self, MatrixConfig},
        models::JobResult,
        planner,
        provisioner::ProcessProvisioner,
        scheduler::MatrixScheduler,
        suite::CommandSuiteRunner,
    },
    infra::{ports::PortPool, t},
    reporting::{
        console::{print_failure_details, print_plan, print_summary},
        coverage::{publish_best_effort, DirectoryCoverageSink},
        html::generate_html_report,
        json::write_json_report,
    },
};

/// Command-line options of `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: PathBuf,
    /// Language given with `--lang`; overrides the configuration file.
    pub explicit_language: Option<String>,
    pub jobs: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub total_runners: Option<usize>,
    pub runner_index: Option<usize>,
    pub html: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

/// Executes the run command with the provided options.
///
/// # Returns
/// The exit code carrying the matrix verdict. Configuration problems are
/// returned as errors.
pub async fn execute(options: RunOptions) -> Result<ExitCode> {
    let (mut matrix_config, config_path) = setup_and_parse_config(&options.config)?;
    let locale = apply_language(&matrix_config, options.explicit_language.as_deref());

    println!(
        "{}",
        t!("run.loading_config", locale = &locale, path = config_path.display())
    );

    if let Some(jobs) = options.jobs {
        anyhow::ensure!(jobs > 0, t!("run.invalid_jobs", locale = &locale).to_string());
        matrix_config.settings.concurrency_limit = jobs;
    }
    if let Some(secs) = options.job_timeout_secs {
        anyhow::ensure!(secs > 0, t!("run.invalid_job_timeout", locale = &locale).to_string());
        matrix_config.settings.job_timeout_secs = secs;
    }

    for warning in matrix_config.warnings() {
        warn!("{}", warning);
        println!("{}", t!("run.config_warning", locale = &locale, warning = warning).yellow());
    }

    let plan = planner::plan_execution(&matrix_config, options.total_runners, options.runner_index)?;
    print_plan(&plan, &locale);

    if let (Some(total), Some(index)) = (options.total_runners, options.runner_index) {
        println!(
            "{}",
            t!(
                "run.running_as_split_runner",
                locale = &locale,
                index = index + 1,
                total = total,
                count = plan.cells.len()
            )
            .bold()
        );
    } else {
        println!(
            "{}",
            t!(
                "run.running_as_single_runner",
                locale = &locale,
                concurrency = matrix_config.settings.concurrency_limit
            )
            .bold()
        );
    }

    if plan.cells.is_empty() {
        println!("{}", t!("run.no_cells_to_run", locale = &locale).green());
        return Ok(ExitCode::SUCCESS);
    }

    let stop = setup_signal_handler(&locale);

    let provisioner = Arc::new(
        ProcessProvisioner::new(matrix_config.server.clone(), PortPool::new())
            .with_artifacts_dir(matrix_config.settings.artifacts_dir.clone()),
    );
    let runner = Arc::new(CommandSuiteRunner::new(matrix_config.suite.clone()));
    let scheduler = MatrixScheduler::new(matrix_config.settings.clone(), provisioner, runner);

    let results = scheduler.run_all(plan.cells, stop).await;

    let aggregate_result = match aggregate(&results) {
        Ok(aggregate_result) => aggregate_result,
        Err(e) => {
            eprintln!("{} {}", t!("run.aggregation_failed", locale = &locale).red().bold(), e);
            return Ok(ExitCode::from(EXIT_AGGREGATION_ERROR));
        }
    };

    print_summary(&aggregate_result, &locale);

    let failures: Vec<&JobResult> = results.iter().filter(|r| !r.outcome.is_passed()).collect();
    print_failure_details(&failures, &locale);

    write_reports_best_effort(&aggregate_result, &results, &options, &locale);

    if let Some(output_dir) = &matrix_config.coverage.output_dir {
        if aggregate_result.coverage.is_empty() {
            println!("{}", t!("coverage.nothing_to_publish", locale = &locale).dimmed());
        } else {
            let sink = DirectoryCoverageSink::new(output_dir, matrix_config.coverage.upload.clone())
                .with_upload_timeout(matrix_config.coverage.upload_timeout());
            publish_best_effort(&sink, &aggregate_result.coverage).await;
        }
    }

    Ok(ExitCode::from(aggregate_result.exit_code()))
}

/// Sets up and parses the matrix configuration file.
fn setup_and_parse_config(config_path_arg: &Path) -> Result<(MatrixConfig, PathBuf)> {
    // The configured language is not known yet; errors use the process locale.
    let config_path = fs::canonicalize(config_path_arg)
        .with_context(|| t!("run.config_read_failed", path = config_path_arg.display()).to_string())?;

    let matrix_config = config::load_matrix_config(&config_path)
        .with_context(|| t!("run.config_parse_failed").to_string())?;

    Ok((matrix_config, config_path))
}

/// Applies the locale precedence `--lang` > configuration > system.
fn apply_language(matrix_config: &MatrixConfig, explicit: Option<&str>) -> String {
    let locale = crate::resolve_locale(explicit.or(matrix_config.language.as_deref()));
    rust_i18n::set_locale(&locale);
    locale
}

/// Sets up a signal handler for graceful shutdown.
fn setup_signal_handler(locale: &str) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();
    let locale = locale.to_string();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\n{}", t!("run.shutdown_signal", locale = &locale).yellow());
                token_clone.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    token
}

fn write_reports_best_effort(
    aggregate_result: &AggregateResult,
    results: &[JobResult],
    options: &RunOptions,
    locale: &str,
) {
    if let Some(report_path) = &options.html {
        println!(
            "\n{}",
            t!("run.generating_html_report", locale = locale, path = report_path.display())
        );
        if let Err(e) = generate_html_report(aggregate_result, results, report_path, locale) {
            eprintln!("{} {:#}", t!("run.report_failed", locale = locale).red(), e);
        }
    }

    if let Some(report_path) = &options.json {
        println!(
            "{}",
            t!("run.generating_json_report", locale = locale, path = report_path.display())
        );
        if let Err(e) = write_json_report(aggregate_result, results, report_path) {
            eprintln!("{} {:#}", t!("run.report_failed", locale = locale).red(), e);
        }
    }
}
