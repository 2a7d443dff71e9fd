//! # Init Command Module / 初始化命令模块
//!
//! This module implements the `init` command, which writes a starter matrix
//! configuration either from a documented template (`--non-interactive`) or
//! through an interactive wizard.
//!
//! 此模块实现 `init` 命令，它通过带注释的模板（`--non-interactive`）
//! 或交互式向导写出初始的矩阵配置。

use anyhow::{Context, Result};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, MultiSelect};
use std::{fs, path::Path};

use crate::core::config::{
    CoverageConfig, MatrixConfig, MatrixSpec, ServerConfig, Settings, SuiteConfig,
};
use crate::core::models::{Mode, ServerVersion};
use crate::infra::t;

/// Template written by `init --non-interactive`.
pub const DEFAULT_CONFIG: &str = r#"# E2E Matrix Configuration / 端到端矩阵配置

# Language for output messages / 输出消息的语言
language = "en"

[matrix]
# Client runtimes the suite runs on / 运行测试套件的客户端运行时
runtimes = ["3.10", "3.12"]
# Server versions: pinned release tags plus "trunk" / 服务器版本：固定发布标签加上 "trunk"
servers = ["0.10", "trunk"]
# "e2e" runs against a live server and gates the verdict;
# "coverage-only" runs without a server and is informational.
modes = ["e2e"]

# Extra cells appended after the cartesian product / 追加在笛卡尔积之后的额外单元
[[matrix.include]]
runtime = "3.12"
server = "trunk"
mode = "coverage-only"

[settings]
# Jobs in flight at once; 1 is strictly sequential / 同时运行的作业数；1 为严格串行
concurrency_limit = 1
job_timeout_secs = 1800
matrix_timeout_secs = 14400

[server]
host = "127.0.0.1"
# Optional: fetch or build the requested version / 可选：获取或构建所需版本
fetch = "./scripts/fetch-server.sh {version} {workdir}"
# Must keep running and listen on {host}:{port} / 必须持续运行并监听 {host}:{port}
start = "./scripts/start-server.sh {version} {host} {port} {workdir}"
ready_timeout_secs = 30

[suite]
# The suite writes a JSON report to {report} / 套件将 JSON 报告写入 {report}
command = "./scripts/run-suite.sh {runtime} {host} {port} {report}"
coverage_command = "./scripts/run-suite.sh --coverage {runtime} {report} {coverage_file}"

[coverage]
output_dir = "target/e2e-coverage"
"#;

/// Writes a configuration file at `output`.
///
/// # Arguments
/// * `output` - Path of the configuration file to create
/// * `language` - Locale used by the wizard and recorded in the file
/// * `non_interactive` - Write the template without asking anything
/// * `force` - Overwrite an existing file without confirmation
pub fn run_init_wizard(output: &Path, language: &str, non_interactive: bool, force: bool) -> Result<()> {
    let theme = ColorfulTheme::default();

    if output.exists() && !force {
        if non_interactive {
            println!("{}", t!("init.file_exists", locale = language, path = output.display()).red());
            println!("{}", t!("init.use_force", locale = language).yellow());
            anyhow::bail!(t!("init.file_exists", locale = language, path = output.display()).to_string());
        }
        let confirmation = Confirm::with_theme(&theme)
            .with_prompt(t!("init.overwrite_prompt", locale = language, path = output.display()))
            .default(false)
            .interact()
            .context(t!("init.user_confirmation_failed", locale = language).to_string())?;
        if !confirmation {
            println!("{}", t!("init.aborted", locale = language));
            return Ok(());
        }
    }

    let content = if non_interactive {
        DEFAULT_CONFIG.to_string()
    } else {
        println!("\n{}", t!("init.wizard_welcome", locale = language).cyan().bold());
        println!("{}", t!("init.wizard_description", locale = language));
        let matrix_config = ask_matrix_config(&theme, language)?;
        toml::to_string_pretty(&matrix_config).context("Failed to serialize configuration")?
    };

    write_config(output, &content, language)
}

fn ask_matrix_config(theme: &ColorfulTheme, language: &str) -> Result<MatrixConfig> {
    let runtimes: String = Input::with_theme(theme)
        .with_prompt(t!("init.runtimes_prompt", locale = language))
        .default("3.10, 3.12".to_string())
        .interact_text()?;
    let servers: String = Input::with_theme(theme)
        .with_prompt(t!("init.servers_prompt", locale = language))
        .default("0.10, trunk".to_string())
        .interact_text()?;

    let mode_options = [
        (Mode::EndToEnd, t!("init.mode_e2e", locale = language)),
        (Mode::CoverageOnly, t!("init.mode_coverage_only", locale = language)),
    ];
    let selections = MultiSelect::with_theme(theme)
        .with_prompt(t!("init.modes_prompt", locale = language))
        .items(&mode_options.iter().map(|o| o.1.clone()).collect::<Vec<_>>())
        .defaults(&[true, false])
        .interact()
        .context(t!("init.user_confirmation_failed", locale = language).to_string())?;

    let mut modes: Vec<Mode> = selections.into_iter().map(|i| mode_options[i].0).collect();
    if modes.is_empty() {
        println!("{}", t!("init.no_modes_selected", locale = language).yellow());
        modes.push(Mode::EndToEnd);
    }

    let server = if modes.contains(&Mode::EndToEnd) {
        let start: String = Input::with_theme(theme)
            .with_prompt(t!("init.server_start_prompt", locale = language))
            .default("./scripts/start-server.sh {version} {host} {port} {workdir}".to_string())
            .interact_text()?;
        Some(ServerConfig::with_start(start))
    } else {
        None
    };

    let command: String = Input::with_theme(theme)
        .with_prompt(t!("init.suite_command_prompt", locale = language))
        .default("./scripts/run-suite.sh {runtime} {host} {port} {report}".to_string())
        .interact_text()?;

    let servers = split_list(&servers)
        .into_iter()
        .map(|tag| ServerVersion::parse(&tag).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let matrix_config = MatrixConfig {
        language: Some(language.to_string()),
        matrix: MatrixSpec {
            runtimes: split_list(&runtimes),
            servers,
            modes,
            include: Vec::new(),
            exclude: Vec::new(),
        },
        settings: Settings::default(),
        server,
        suite: SuiteConfig::with_command(command),
        coverage: CoverageConfig::default(),
    };
    matrix_config.validate()?;
    Ok(matrix_config)
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_config(output: &Path, content: &str, language: &str) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            t!("init.create_parent_dir_failed", locale = language, path = parent.display()).to_string()
        })?;
    }

    fs::write(output, content)
        .with_context(|| t!("init.write_failed", locale = language, path = output.display()).to_string())?;

    println!("{}", t!("init.success", locale = language, path = output.display()).green());
    println!("{}", t!("init.next_steps", locale = language));
    Ok(())
}
