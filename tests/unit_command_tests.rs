//! # Command Module Unit Tests / Command 模块单元测试
//!
//! Tests template rendering, command construction and output capture of the
//! `infra::command` module.
//!
//! 测试 `infra::command` 模块的模板渲染、命令构建和输出捕获。

use std::time::Duration;
use xmpp_e2e_matrix::infra::command::{build_command, render_template, spawn_and_capture, tail};

#[cfg(test)]
mod render_template_tests {
    use super::*;

    #[test]
    fn test_known_placeholders_are_replaced() {
        let vars = [("host", "127.0.0.1".to_string()), ("port", "5222".to_string())];
        assert_eq!(render_template("{host}:{port}", &vars), "127.0.0.1:5222");
    }

    #[test]
    fn test_unknown_placeholders_are_left_alone() {
        let vars = [("port", "5222".to_string())];
        assert_eq!(
            render_template("{\"port\": {port}, \"x\": {other}}", &vars),
            "{\"port\": 5222, \"x\": {other}}"
        );
    }
}

#[cfg(test)]
mod build_command_tests {
    use super::*;

    #[test]
    fn test_printable_form_has_substituted_values() {
        let vars = [("version", "0.10".to_string())];
        let (_, printable) = build_command("fetch-server --tag {version}", &vars).unwrap();
        assert_eq!(printable, "fetch-server --tag 0.10");
    }

    #[test]
    fn test_empty_template_is_rejected() {
        assert!(build_command("   ", &[]).is_err());
    }

    #[test]
    fn test_unbalanced_quotes_are_rejected() {
        assert!(build_command("echo 'unterminated", &[]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_value_with_spaces_stays_one_argument() {
        let vars = [("value", "a b".to_string())];
        let (cmd, _) = build_command("printf '%s|' {value}", &vars).unwrap();
        let (status, output) = spawn_and_capture(cmd).await;
        assert!(status.unwrap().success());
        assert_eq!(output.trim_end(), "a b|");
    }
}

#[cfg(all(test, unix))]
mod spawn_and_capture_tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo to-stdout; echo to-stderr 1>&2; exit 3"]);

        let (status, output) = spawn_and_capture(cmd).await;

        assert_eq!(status.unwrap().code(), Some(3));
        assert!(output.contains("to-stdout"));
        assert!(output.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-program-4711");
        let (status, output) = spawn_and_capture(cmd).await;
        assert!(status.is_err());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_and_draining_continues() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'a\\377b\\r\\n' 1>&2; echo after"]);

        let (status, output) = spawn_and_capture(cmd).await;

        assert!(status.unwrap().success());
        assert!(output.contains("a\u{FFFD}b\n"));
        assert!(output.contains("after"));
    }

    #[tokio::test]
    async fn test_dropping_the_future_abandons_the_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(200), spawn_and_capture(cmd)).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

#[test]
fn test_tail_keeps_last_lines() {
    let output = "one\ntwo\nthree\nfour\n";
    assert_eq!(tail(output, 2), "three\nfour");
    assert_eq!(tail(output, 10), "one\ntwo\nthree\nfour");
    assert_eq!(tail("", 3), "");
}
