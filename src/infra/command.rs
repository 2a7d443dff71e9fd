//! # Command Execution Module / 命令执行模块
//!
//! Builds processes from the command templates of the configuration file and
//! runs them with captured, interleaved output.
//!
//! 根据配置文件中的命令模板构建进程，并在捕获交错输出的同时运行它们。

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::infra::t;

/// Values substituted for `{name}` placeholders in command templates.
pub type TemplateVars<'a> = [(&'a str, String)];

/// Replaces every `{name}` placeholder whose name appears in `vars`.
/// Unknown placeholders are left untouched.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// Turns a command template into a ready-to-spawn `tokio::process::Command`.
///
/// `~` and `$VAR` references written by the user are expanded first, the line
/// is then split with shell quoting rules, and placeholders are substituted
/// per argument so that values containing spaces stay a single argument.
///
/// # Returns
/// The command together with its rendered, printable form.
pub fn build_command(
    template: &str,
    vars: &TemplateVars<'_>,
) -> Result<(tokio::process::Command, String)> {
    let expanded = shellexpand::full(template)
        .with_context(|| format!("Failed to expand command: {template}"))?
        .to_string();

    let parts = shlex::split(&expanded)
        .ok_or_else(|| anyhow!("Failed to parse command: {}", expanded))?;
    let parts: Vec<String> = parts
        .iter()
        .map(|part| render_template(part, vars))
        .collect();

    let (program, args) = parts
        .split_first()
        .ok_or_else(|| anyhow!("Empty command after parsing: {template:?}"))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let printable = shlex::try_join(parts.iter().map(String::as_str))
        .unwrap_or_else(|_| parts.join(" "));
    Ok((cmd, printable))
}

/// Spawns a command and captures its stdout and stderr, interleaved line by
/// line in arrival order. Bytes that are not valid UTF-8 are replaced with
/// U+FFFD.
///
/// The child is created with `kill_on_drop`, so dropping the returned future
/// (job timeout, cancellation) kills the process.
///
/// # Returns
/// A tuple containing:
/// - The `ExitStatus` of the process wrapped in an `io::Result`.
/// - The combined stdout and stderr as a `String`.
///
/// 派生一个命令，按到达顺序逐行交错捕获其 stdout 和 stderr。
/// 丢弃返回的 future（作业超时、取消）会终止该进程。
pub async fn spawn_and_capture(cmd: tokio::process::Command) -> (std::io::Result<ExitStatus>, String) {
    capture(cmd, None).await
}

/// Like [`spawn_and_capture`], but every line is also appended to `log_path`
/// as it arrives, so the output survives even if the returned future is
/// dropped before the process ends.
pub async fn spawn_and_capture_logged(
    cmd: tokio::process::Command,
    log_path: &Path,
) -> (std::io::Result<ExitStatus>, String) {
    let log = match File::create(log_path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "could not create output log");
            None
        }
    };
    capture(cmd, log).await
}

async fn capture(
    mut cmd: tokio::process::Command,
    mut log: Option<File>,
) -> (std::io::Result<ExitStatus>, String) {
    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return (Err(e), String::new()),
    };

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            let _ = child.kill().await;
            return (
                Err(std::io::Error::other(
                    t!("command.capture_failed").to_string(),
                )),
                String::new(),
            );
        }
    };

    // Lines are read as bytes: a child writing invalid UTF-8 must still be
    // drained, or it blocks on a full pipe.
    let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
        .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

    let mut output = String::new();
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                let line = line.strip_suffix(b"\r").unwrap_or(&line);
                let start = output.len();
                output.push_str(&String::from_utf8_lossy(line));
                output.push('\n');
                if let Some(file) = log.as_mut() {
                    if let Err(e) = append(file, output[start..].as_bytes()).await {
                        warn!(error = %e, "could not write output log");
                        log = None;
                    }
                }
            }
            Err(e) => {
                // Nobody reads the pipes any more; stop the child instead of
                // waiting on it forever.
                warn!(error = %e, "lost the output pipe of a child process");
                let _ = child.start_kill();
                break;
            }
        }
    }

    let status = child.wait().await;
    (status, output)
}

/// Writes through to disk so a reader sees the line even if the capture is
/// dropped right after.
async fn append(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

/// Returns at most the last `max_lines` lines of `output`.
pub fn tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
