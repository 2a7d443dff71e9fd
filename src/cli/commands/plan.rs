//! # Plan Command Module / 计划命令模块
//!
//! Dry run: expands (and optionally shards) the matrix and prints the cells a
//! `run` would execute, without provisioning anything.
//!
//! 演练：展开（并可选地分片）矩阵，打印 `run` 将要执行的单元，而不启动任何东西。

use anyhow::{Context, Result};
use colored::*;
use std::path::Path;

use crate::{
    core::{config, planner},
    infra::t,
    reporting::console::print_plan,
};

pub fn execute(
    config_path: &Path,
    explicit_language: Option<&str>,
    total_runners: Option<usize>,
    runner_index: Option<usize>,
) -> Result<()> {
    let matrix_config = config::load_matrix_config(config_path)
        .with_context(|| t!("run.config_parse_failed").to_string())?;
    let locale = crate::resolve_locale(explicit_language.or(matrix_config.language.as_deref()));
    rust_i18n::set_locale(&locale);

    for warning in matrix_config.warnings() {
        println!("{}", t!("run.config_warning", locale = &locale, warning = warning).yellow());
    }

    let plan = planner::plan_execution(&matrix_config, total_runners, runner_index)?;
    print_plan(&plan, &locale);
    Ok(())
}
