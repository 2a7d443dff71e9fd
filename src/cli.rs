//! # Command-Line Interface / 命令行接口
//!
//! Builds the localized `clap` command tree and dispatches to the `run`,
//! `plan` and `init` commands.
//!
//! 构建本地化的 `clap` 命令树，并分发到 `run`、`plan` 和 `init` 命令。

pub mod commands;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{env, path::PathBuf, process::ExitCode};

use crate::core::config::DEFAULT_CONFIG_FILE;
use crate::infra::{logging, t};

/// Exit status for configuration and other setup errors.
pub const EXIT_SETUP_ERROR: u8 = 2;
/// Exit status when the results cannot be aggregated into a verdict.
pub const EXIT_AGGREGATION_ERROR: u8 = 2;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` or `--lang=<VALUE>` argument.
fn pre_parse_language() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    if let Some(value) = args.iter().find_map(|arg| arg.strip_prefix("--lang=")) {
        return Some(value.to_string());
    }
    args.iter()
        .position(|arg| arg == "--lang")
        .and_then(|pos| args.get(pos + 1))
        .cloned()
}

fn config_arg(locale: &str) -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help(t!("cli.arg_config", locale = locale).to_string())
        .value_name("CONFIG")
        .default_value(DEFAULT_CONFIG_FILE)
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn shard_args(locale: &str) -> [Arg; 2] {
    [
        Arg::new("total-runners")
            .long("total-runners")
            .help(t!("cli.arg_total_runners", locale = locale).to_string())
            .value_name("TOTAL_RUNNERS")
            .value_parser(clap::value_parser!(usize))
            .action(ArgAction::Set)
            .requires("runner-index"),
        Arg::new("runner-index")
            .long("runner-index")
            .help(t!("cli.arg_runner_index", locale = locale).to_string())
            .value_name("RUNNER_INDEX")
            .value_parser(clap::value_parser!(usize))
            .action(ArgAction::Set)
            .requires("total-runners"),
    ]
}

fn build_cli(locale: &str) -> Command {
    Command::new("xmpp-e2e-matrix")
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli.about", locale = locale).to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli.arg_lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help(t!("cli.arg_verbose", locale = locale).to_string())
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cli.cmd_run_about", locale = locale).to_string())
                .arg(config_arg(locale))
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help(t!("cli.arg_jobs", locale = locale).to_string())
                        .value_name("JOBS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("job-timeout")
                        .long("job-timeout")
                        .help(t!("cli.arg_job_timeout", locale = locale).to_string())
                        .value_name("SECS")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .args(shard_args(locale))
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help(t!("cli.arg_html", locale = locale).to_string())
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help(t!("cli.arg_json", locale = locale).to_string())
                        .value_name("JSON")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about(t!("cli.cmd_plan_about", locale = locale).to_string())
                .arg(config_arg(locale))
                .args(shard_args(locale)),
        )
        .subcommand(
            Command::new("init")
                .about(t!("cli.cmd_init_about", locale = locale).to_string())
                .arg(
                    Arg::new("non-interactive")
                        .long("non-interactive")
                        .help(t!("cli.arg_non_interactive", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help(t!("cli.arg_output", locale = locale).to_string())
                        .value_name("PATH")
                        .default_value(DEFAULT_CONFIG_FILE)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help(t!("cli.arg_force", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn shard_options(matches: &ArgMatches) -> (Option<usize>, Option<usize>) {
    (
        matches.get_one::<usize>("total-runners").copied(),
        matches.get_one::<usize>("runner-index").copied(),
    )
}

fn config_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Parses the command line and runs the selected command.
///
/// # Returns
/// The process exit code: `0` for a green matrix, `1` for a red one and `2`
/// when no verdict could be produced.
pub async fn run() -> Result<ExitCode> {
    // Pre-parse language and initialize i18n first.
    let explicit_language = pre_parse_language();
    let language = crate::resolve_locale(explicit_language.as_deref());
    rust_i18n::set_locale(&language);

    let matches = build_cli(&language).get_matches();
    logging::init_logging(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let (total_runners, runner_index) = shard_options(run_matches);
            commands::run::execute(commands::run::RunOptions {
                config: config_path(run_matches),
                explicit_language,
                jobs: run_matches.get_one::<usize>("jobs").copied(),
                job_timeout_secs: run_matches.get_one::<u64>("job-timeout").copied(),
                total_runners,
                runner_index,
                html: run_matches.get_one::<PathBuf>("html").cloned(),
                json: run_matches.get_one::<PathBuf>("json").cloned(),
            })
            .await
        }
        Some(("plan", plan_matches)) => {
            let (total_runners, runner_index) = shard_options(plan_matches);
            commands::plan::execute(
                &config_path(plan_matches),
                explicit_language.as_deref(),
                total_runners,
                runner_index,
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("init", init_matches)) => {
            let output = init_matches
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            // Show language detection message if it was auto-detected
            if explicit_language.is_none() {
                println!(
                    "🌐 {}",
                    t!("init.system_language_detected", locale = &language, lang = &language)
                );
            }
            commands::init::run_init_wizard(
                &output,
                &language,
                init_matches.get_flag("non-interactive"),
                init_matches.get_flag("force"),
            )?;
            Ok(ExitCode::SUCCESS)
        }
        // `subcommand_required` makes clap print help and exit before this.
        _ => Ok(ExitCode::from(EXIT_SETUP_ERROR)),
    }
}
