//! # Provisioner Integration Tests / 服务器准备器集成测试
//!
//! Drives `ProcessProvisioner` with real child processes and checks the
//! readiness check against real sockets.
//!
//! 使用真实子进程驱动 `ProcessProvisioner`，并针对真实套接字检查就绪检测。

#![cfg(unix)]

mod common;

use common::cell;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use xmpp_e2e_matrix::core::config::ServerConfig;
use xmpp_e2e_matrix::core::error::ProvisionError;
use xmpp_e2e_matrix::core::models::{ErrorKind, Mode};
use xmpp_e2e_matrix::core::provisioner::{
    wait_until_ready, ProcessProvisioner, ReadinessFailure, ReadinessPolicy, ServerProvisioner,
    SERVER_LOG_FILE,
};
use xmpp_e2e_matrix::infra::ports::PortPool;

fn fast_policy(max_wait: Duration) -> ReadinessPolicy {
    ReadinessPolicy {
        max_wait,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(80),
    }
}

fn server_config(start: &str) -> ServerConfig {
    let mut config = ServerConfig::with_start(start);
    config.initial_backoff_ms = 20;
    config.max_backoff_ms = 200;
    config.teardown_timeout_secs = 2;
    config
}

fn has_python() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod readiness_tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_socket_is_ready_on_first_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let attempts = wait_until_ready(&address, fast_policy(Duration::from_secs(2)), || None)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_unbounded_budget_does_not_overflow_the_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let attempts = wait_until_ready(&address, fast_policy(Duration::MAX), || None)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_closed_port_times_out_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = wait_until_ready(&address, fast_policy(Duration::from_millis(300)), || None).await;
        match result {
            Err(ReadinessFailure::TimedOut { attempts, waited }) => {
                assert!(attempts >= 2, "expected retries, got {attempts}");
                assert!(waited >= Duration::from_millis(300));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exited_server_is_reported_without_waiting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = std::time::Instant::now();
        let result = wait_until_ready(&address, fast_policy(Duration::from_secs(30)), || {
            Some(ExitStatus::from_raw(3 << 8))
        })
        .await;

        assert!(matches!(result, Err(ReadinessFailure::Exited(status)) if status.code() == Some(3)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_server_that_comes_up_late_is_found() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(address).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(listener);
        });

        let attempts = wait_until_ready(&address.to_string(), fast_policy(Duration::from_secs(2)), || None)
            .await
            .unwrap();
        assert!(attempts > 1);
        binder.abort();
    }
}

#[cfg(test)]
mod process_provisioner_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_server_section_fails_to_start() {
        let provisioner = ProcessProvisioner::new(None, PortPool::new());
        let err = provisioner
            .provision(&cell(0, "3.6", "trunk", Mode::EndToEnd))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StartFailed);
    }

    #[tokio::test]
    async fn test_failing_fetch_is_a_download_failure() {
        let mut config = server_config("sleep 30");
        config.fetch = Some("false".to_string());
        let ports = PortPool::new();
        let provisioner = ProcessProvisioner::new(Some(config), ports.clone());

        let err = provisioner
            .provision(&cell(0, "3.6", "0.9", Mode::EndToEnd))
            .await
            .unwrap_err();

        assert!(matches!(&err, ProvisionError::DownloadFailed { version, .. } if version == "0.9"));
        assert_eq!(ports.leased(), 0);
    }

    #[tokio::test]
    async fn test_server_exiting_early_is_a_start_failure() {
        let ports = PortPool::new();
        let provisioner = ProcessProvisioner::new(
            Some(server_config("sh -c 'echo boot failed; exit 3'")),
            ports.clone(),
        );

        let err = provisioner
            .provision(&cell(0, "3.6", "0.10", Mode::EndToEnd))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StartFailed);
        let message = err.to_string();
        assert!(message.contains("0.10"));
        assert!(message.contains("boot failed"), "log tail missing: {message}");
        assert_eq!(ports.leased(), 0);
    }

    #[tokio::test]
    async fn test_server_never_listening_times_out() {
        let mut config = server_config("sleep 30");
        config.ready_timeout_secs = 1;
        let ports = PortPool::new();
        let provisioner = ProcessProvisioner::new(Some(config), ports.clone());

        let started = std::time::Instant::now();
        let err = provisioner
            .provision(&cell(0, "3.6", "trunk", Mode::EndToEnd))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(ports.leased(), 0);
    }

    #[tokio::test]
    async fn test_timeout_carries_the_server_log_tail() {
        let mut config = server_config("sh -c 'echo waiting for a database; sleep 30'");
        config.ready_timeout_secs = 1;
        let provisioner = ProcessProvisioner::new(Some(config), PortPool::new());

        let err = provisioner
            .provision(&cell(0, "3.6", "trunk", Mode::EndToEnd))
            .await
            .unwrap_err();

        assert!(
            matches!(&err, ProvisionError::Timeout { log_tail, .. } if log_tail.contains("waiting for a database")),
            "unexpected error: {err:?}"
        );
        assert!(err.to_string().contains("waiting for a database"));
    }

    #[tokio::test]
    async fn test_failed_server_directory_is_kept_in_artifacts() {
        let artifacts = tempfile::tempdir().unwrap();
        let provisioner = ProcessProvisioner::new(
            Some(server_config("sh -c 'echo boot failed; exit 3'")),
            PortPool::new(),
        )
        .with_artifacts_dir(Some(artifacts.path().to_path_buf()));
        let cell = cell(0, "3.6", "0.10", Mode::EndToEnd);

        let err = provisioner.provision(&cell).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StartFailed);

        let log = artifacts
            .path()
            .join(cell.slug())
            .join("server")
            .join(SERVER_LOG_FILE);
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("boot failed"));
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_its_files_in_artifacts() {
        let artifacts = tempfile::tempdir().unwrap();
        let mut config = server_config("sleep 30");
        config.fetch = Some("sh -c 'echo half > {workdir}/download.part; exit 1'".to_string());
        let provisioner = ProcessProvisioner::new(Some(config), PortPool::new())
            .with_artifacts_dir(Some(artifacts.path().to_path_buf()));
        let cell = cell(0, "3.6", "0.9", Mode::EndToEnd);

        let err = provisioner.provision(&cell).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DownloadFailed);

        let kept = artifacts.path().join(cell.slug()).join("server").join("download.part");
        assert_eq!(std::fs::read_to_string(kept).unwrap().trim(), "half");
    }

    #[tokio::test]
    async fn test_ready_server_is_released_exactly_once() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let ports = PortPool::new();
        let provisioner = ProcessProvisioner::new(
            Some(server_config("python3 -m http.server {port} --bind {host}")),
            ports.clone(),
        );

        let mut handle = provisioner
            .provision(&cell(0, "3.6", "trunk", Mode::EndToEnd))
            .await
            .unwrap();

        assert!(!handle.is_released());
        assert_eq!(ports.leased(), 1);
        let workdir = handle.workdir().unwrap().to_path_buf();
        assert!(workdir.join(SERVER_LOG_FILE).exists());
        assert!(tokio::net::TcpStream::connect(handle.endpoint().to_string())
            .await
            .is_ok());

        provisioner.release(&mut handle).await;
        assert!(handle.is_released());
        assert!(!workdir.exists());
        assert_eq!(ports.leased(), 0);

        // Second release is a no-op.
        provisioner.release(&mut handle).await;
        assert!(!handle.shutdown(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_concurrent_servers_get_distinct_endpoints() {
        if !has_python() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let provisioner = ProcessProvisioner::new(
            Some(server_config("python3 -m http.server {port} --bind {host}")),
            PortPool::new(),
        );
        let first = cell(0, "3.6", "0.9", Mode::EndToEnd);
        let second = cell(1, "3.6", "0.10", Mode::EndToEnd);

        let (a, b) = tokio::join!(provisioner.provision(&first), provisioner.provision(&second));
        let (mut a, mut b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.endpoint().port, b.endpoint().port);
        assert_ne!(a.workdir(), b.workdir());

        provisioner.release(&mut a).await;
        provisioner.release(&mut b).await;
    }
}
