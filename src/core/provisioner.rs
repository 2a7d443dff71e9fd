//! # Server Provisioner / 服务器准备器
//!
//! Stands up one server instance per end-to-end job: an isolated port and
//! working directory, an optional fetch/build step, the server process itself,
//! and a readiness check with exponential backoff. A `ServerHandle` is only
//! handed out once the server accepts connections, and it is torn down exactly
//! once.
//!
//! 为每个端到端作业启动一个服务器实例：独立的端口和工作目录、可选的获取/构建步骤、
//! 服务器进程本身，以及带指数退避的就绪探测。`ServerHandle` 仅在服务器接受连接后才会交出，
//! 并且只会被拆除一次。

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::core::config::ServerConfig;
use crate::core::error::ProvisionError;
use crate::core::models::{Endpoint, MatrixCell, ServerVersion};
use crate::infra::command::{build_command, spawn_and_capture, tail};
use crate::infra::fs::{create_scratch_dir, preserve_dir, SERVER_ARTIFACTS};
use crate::infra::ports::{PortLease, PortPool};

/// Name of the file receiving the server's stdout and stderr.
pub const SERVER_LOG_FILE: &str = "server.log";

/// Lines of `server.log` carried in provisioning errors.
const LOG_TAIL_LINES: usize = 20;

/// Stand-in deadline for readiness budgets too large for `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Provisions and releases server instances for end-to-end jobs.
///
/// Implementations must give concurrently live handles distinct ports and
/// working directories, and `release` must be idempotent.
pub trait ServerProvisioner: Send + Sync + 'static {
    /// Starts a server for `cell.server` and returns once it is ready.
    fn provision(
        &self,
        cell: &MatrixCell,
    ) -> impl Future<Output = Result<ServerHandle, ProvisionError>> + Send;

    /// Tears the server down. Calling it on an already released handle does
    /// nothing.
    fn release(&self, handle: &mut ServerHandle) -> impl Future<Output = ()> + Send;
}

/// A live server: its process (if the orchestrator owns one), endpoint,
/// working directory and port lease.
///
/// If a handle is dropped without `release`, the process is still killed
/// (`kill_on_drop`) and the directory and port are reclaimed.
#[derive(Debug)]
pub struct ServerHandle {
    version: ServerVersion,
    endpoint: Endpoint,
    process: Option<Child>,
    workdir: Option<TempDir>,
    lease: Option<PortLease>,
    released: bool,
}

impl ServerHandle {
    /// A handle for a server whose lifecycle is managed elsewhere (for example
    /// an in-process server).
    pub fn new(version: ServerVersion, endpoint: Endpoint) -> Self {
        Self {
            version,
            endpoint,
            process: None,
            workdir: None,
            lease: None,
            released: false,
        }
    }

    fn with_resources(mut self, process: Child, workdir: TempDir, lease: PortLease) -> Self {
        self.process = Some(process);
        self.workdir = Some(workdir);
        self.lease = Some(lease);
        self
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Kills the process, waits up to `grace` for it to exit and frees the
    /// working directory and port.
    ///
    /// Returns `true` only for the call that actually performed the teardown.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.start_kill() {
                debug!(version = %self.version, error = %e, "server process already gone");
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(version = %self.version, %status, "server process exited"),
                Ok(Err(e)) => warn!(version = %self.version, error = %e, "failed to reap server process"),
                Err(_) => warn!(version = %self.version, ?grace, "server process did not exit in time"),
            }
        }

        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            if let Err(e) = workdir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove server working directory");
            }
        }
        self.lease = None;
        true
    }
}

/// Readiness check budget.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub max_wait: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReadinessPolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_wait: Duration::from_secs(config.ready_timeout_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Why a server never became ready.
#[derive(Debug)]
pub enum ReadinessFailure {
    TimedOut { attempts: u32, waited: Duration },
    Exited(ExitStatus),
}

/// Polls `address` with TCP connects until one succeeds.
///
/// The delay between attempts starts at `initial_backoff` and doubles up to
/// `max_backoff`. `exited` is consulted after every failed attempt so a server
/// that died is reported immediately instead of after the full budget.
///
/// # Returns
/// The number of attempts it took.
pub async fn wait_until_ready<F>(
    address: &str,
    policy: ReadinessPolicy,
    mut exited: F,
) -> Result<u32, ReadinessFailure>
where
    F: FnMut() -> Option<ExitStatus>,
{
    let started = Instant::now();
    let deadline = started
        .checked_add(policy.max_wait)
        .unwrap_or_else(|| started + FAR_FUTURE);
    let mut backoff = policy.initial_backoff;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, TcpStream::connect(address)).await {
            Ok(Ok(_)) => return Ok(attempts),
            Ok(Err(e)) => debug!(address, attempts, error = %e, ?backoff, "server not ready yet"),
            Err(_) => debug!(address, attempts, "readiness check timed out"),
        }

        if let Some(status) = exited() {
            return Err(ReadinessFailure::Exited(status));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ReadinessFailure::TimedOut {
                attempts,
                waited: started.elapsed(),
            });
        }
        tokio::time::sleep(backoff.min(remaining)).await;
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}

/// Provisions servers by running the `[server]` commands of the configuration.
///
/// When an artifacts directory is set, the working directory of a server that
/// failed to come up (fetch error, early exit, readiness timeout) is copied to
/// `<artifacts>/<cell-slug>/server` before it is removed.
pub struct ProcessProvisioner {
    config: Option<ServerConfig>,
    ports: Arc<PortPool>,
    artifacts_dir: Option<PathBuf>,
}

impl ProcessProvisioner {
    /// `config` may be `None` for matrices without end-to-end cells; any
    /// provisioning attempt then fails with `StartFailed`.
    pub fn new(config: Option<ServerConfig>, ports: Arc<PortPool>) -> Self {
        Self {
            config,
            ports,
            artifacts_dir: None,
        }
    }

    pub fn with_artifacts_dir(mut self, artifacts_dir: Option<PathBuf>) -> Self {
        self.artifacts_dir = artifacts_dir;
        self
    }

    pub fn ports(&self) -> &Arc<PortPool> {
        &self.ports
    }

    async fn fetch(
        &self,
        config: &ServerConfig,
        template: &str,
        version: &ServerVersion,
        vars: &[(&str, String)],
        workdir: &Path,
    ) -> Result<(), ProvisionError> {
        let download_failed = |reason: String| ProvisionError::DownloadFailed {
            version: version.tag().to_string(),
            reason,
        };

        let (mut cmd, printable) =
            build_command(template, vars).map_err(|e| download_failed(format!("{e:#}")))?;
        cmd.current_dir(workdir).envs(server_env(vars));

        info!(%version, command = %printable, "fetching server");
        let budget = Duration::from_secs(config.fetch_timeout_secs);
        let (status, output) = tokio::time::timeout(budget, spawn_and_capture(cmd))
            .await
            .map_err(|_| download_failed(format!("`{printable}` did not finish within {budget:?}")))?;
        let status = status.map_err(|e| download_failed(format!("could not run `{printable}`: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(download_failed(format!(
                "`{printable}` exited with {status}\n{}",
                tail(&output, LOG_TAIL_LINES)
            )))
        }
    }
}

impl ProcessProvisioner {
    /// Fetches (if configured) and starts the server inside `workdir`, then
    /// waits for it to accept connections.
    async fn start(
        &self,
        config: &ServerConfig,
        version: &ServerVersion,
        endpoint: &Endpoint,
        workdir: &Path,
    ) -> Result<Child, ProvisionError> {
        let start_failed = |reason: String| ProvisionError::StartFailed {
            version: version.tag().to_string(),
            reason,
        };
        let vars = [
            ("version", version.tag().to_string()),
            ("host", endpoint.host.clone()),
            ("port", endpoint.port.to_string()),
            ("workdir", workdir.display().to_string()),
        ];

        if let Some(fetch) = &config.fetch {
            self.fetch(config, fetch, version, &vars, workdir).await?;
        }

        let (mut cmd, printable) =
            build_command(&config.start, &vars).map_err(|e| start_failed(format!("{e:#}")))?;
        let log_path = workdir.join(SERVER_LOG_FILE);
        let log = std::fs::File::create(&log_path)
            .map_err(|e| start_failed(format!("could not create {}: {e}", log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|e| start_failed(format!("could not share {}: {e}", log_path.display())))?;
        cmd.current_dir(workdir)
            .envs(server_env(&vars))
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err);

        info!(%version, %endpoint, command = %printable, "starting server");
        let mut child = cmd
            .spawn()
            .map_err(|e| start_failed(format!("could not spawn `{printable}`: {e}")))?;

        let policy = ReadinessPolicy::from_config(config);
        let address = endpoint.to_string();
        let readiness = wait_until_ready(&address, policy, || child.try_wait().ok().flatten()).await;

        match readiness {
            Ok(attempts) => {
                info!(%version, %endpoint, attempts, "server is ready");
                Ok(child)
            }
            Err(failure) => {
                let _ = child.start_kill();
                let grace = Duration::from_secs(config.teardown_timeout_secs);
                let _ = tokio::time::timeout(grace, child.wait()).await;
                let log_tail = std::fs::read(&log_path)
                    .map(|log| tail(&String::from_utf8_lossy(&log), LOG_TAIL_LINES))
                    .unwrap_or_default();
                Err(match failure {
                    ReadinessFailure::TimedOut { attempts, waited } => ProvisionError::Timeout {
                        version: version.tag().to_string(),
                        address,
                        waited,
                        attempts,
                        log_tail,
                    },
                    ReadinessFailure::Exited(status) => {
                        start_failed(format!("server exited with {status} before becoming ready\n{log_tail}"))
                    }
                })
            }
        }
    }

    fn preserve_failed_workdir(&self, cell: &MatrixCell, workdir: &Path) {
        let Some(artifacts_dir) = &self.artifacts_dir else {
            return;
        };
        let target = artifacts_dir.join(cell.slug()).join(SERVER_ARTIFACTS);
        match preserve_dir(workdir, &target) {
            Ok(()) => debug!(cell = %cell, path = %target.display(), "kept working directory of failed server"),
            Err(e) => warn!(cell = %cell, error = %e, "failed to preserve server directory"),
        }
    }
}

impl ServerProvisioner for ProcessProvisioner {
    async fn provision(&self, cell: &MatrixCell) -> Result<ServerHandle, ProvisionError> {
        let version = &cell.server;
        let start_failed = |reason: String| ProvisionError::StartFailed {
            version: version.tag().to_string(),
            reason,
        };

        let config = self
            .config
            .as_ref()
            .ok_or_else(|| start_failed("no [server] section is configured".to_string()))?;

        let lease = self
            .ports
            .allocate(&config.host)
            .map_err(|e| start_failed(format!("could not allocate a port: {e}")))?;
        let workdir = create_scratch_dir("server", &cell.slug())
            .map_err(|e| start_failed(format!("{e:#}")))?;
        let endpoint = Endpoint::new(config.host.clone(), lease.port());

        match self.start(config, version, &endpoint, workdir.path()).await {
            Ok(child) => {
                Ok(ServerHandle::new(version.clone(), endpoint).with_resources(child, workdir, lease))
            }
            Err(e) => {
                self.preserve_failed_workdir(cell, workdir.path());
                Err(e)
            }
        }
    }

    async fn release(&self, handle: &mut ServerHandle) {
        let grace = self
            .config
            .as_ref()
            .map(|c| Duration::from_secs(c.teardown_timeout_secs))
            .unwrap_or(Duration::from_secs(10));
        if handle.shutdown(grace).await {
            info!(version = %handle.version(), endpoint = %handle.endpoint(), "server released");
        }
    }
}

fn server_env(vars: &[(&str, String)]) -> Vec<(String, String)> {
    vars.iter()
        .map(|(name, value)| {
            let key = match *name {
                "version" => "E2E_SERVER_VERSION".to_string(),
                other => format!("E2E_{}", other.to_ascii_uppercase()),
            };
            (key, value.clone())
        })
        .collect()
}
