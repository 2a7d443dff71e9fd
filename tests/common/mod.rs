// Shared test helpers for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use xmpp_e2e_matrix::core::error::{ProvisionError, RunnerError};
use xmpp_e2e_matrix::core::models::{
    CoverageBlob, Endpoint, MatrixCell, Mode, ServerVersion, SuiteReport, TestCounts,
};
use xmpp_e2e_matrix::core::provisioner::{ServerHandle, ServerProvisioner};
use xmpp_e2e_matrix::core::suite::{SuiteInvocation, SuiteRun, SuiteRunner, SUITE_LOG_FILE};

/// Writes `content` as a configuration file inside `dir`.
pub fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write config file");
    path
}

pub fn version(tag: &str) -> ServerVersion {
    ServerVersion::parse(tag).expect("valid version tag")
}

pub fn cell(index: usize, runtime: &str, server: &str, mode: Mode) -> MatrixCell {
    MatrixCell::new(index, runtime, version(server), mode)
}

/// The four cells of the reference matrix: three e2e cells on 3.6 and one
/// coverage-only cell.
pub fn reference_cells() -> Vec<MatrixCell> {
    vec![
        cell(0, "3.6", "0.9", Mode::EndToEnd),
        cell(1, "3.6", "0.10", Mode::EndToEnd),
        cell(2, "3.6", "trunk", Mode::EndToEnd),
        cell(3, "3.6", "0.10", Mode::CoverageOnly),
    ]
}

pub fn counts(total: u32, failed: u32, errored: u32, skipped: u32) -> TestCounts {
    TestCounts {
        total,
        failed,
        errored,
        skipped,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProvisionBehavior {
    Ready,
    Timeout,
    StartFailed,
    /// Never returns; only a job timeout or cancellation ends it.
    Hang,
}

/// In-memory provisioner that counts live handles.
#[derive(Debug)]
pub struct FakeProvisioner {
    behaviors: Mutex<HashMap<String, ProvisionBehavior>>,
    delay: Duration,
    next_port: AtomicU16,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub provisioned: AtomicUsize,
    pub released: AtomicUsize,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every successful provisioning takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            delay,
            next_port: AtomicU16::new(40_000),
            live: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
            provisioned: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Sets the behavior for every cell targeting server `tag`.
    pub fn on(self, tag: &str, behavior: ProvisionBehavior) -> Self {
        self.behaviors.lock().unwrap().insert(tag.to_string(), behavior);
        self
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ServerProvisioner for FakeProvisioner {
    async fn provision(&self, cell: &MatrixCell) -> Result<ServerHandle, ProvisionError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(cell.server.tag())
            .copied()
            .unwrap_or(ProvisionBehavior::Ready);

        match behavior {
            ProvisionBehavior::Ready => {}
            ProvisionBehavior::Timeout => {
                return Err(ProvisionError::Timeout {
                    version: cell.server.tag().to_string(),
                    address: "127.0.0.1:1".to_string(),
                    waited: Duration::from_secs(30),
                    attempts: 9,
                    log_tail: "still booting".to_string(),
                });
            }
            ProvisionBehavior::StartFailed => {
                return Err(ProvisionError::StartFailed {
                    version: cell.server.tag().to_string(),
                    reason: "exit status: 3".to_string(),
                });
            }
            ProvisionBehavior::Hang => std::future::pending::<()>().await,
        }

        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        Ok(ServerHandle::new(cell.server.clone(), Endpoint::new("127.0.0.1", port)))
    }

    async fn release(&self, handle: &mut ServerHandle) {
        if handle.shutdown(Duration::ZERO).await {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SuiteBehavior {
    Pass,
    Fail,
    Infrastructure,
    /// Reports success while carrying failed tests.
    Malformed,
    Hang,
    Panic,
}

/// Scripted suite runner keyed by cell label.
#[derive(Debug)]
pub struct FakeRunner {
    behaviors: Mutex<HashMap<String, SuiteBehavior>>,
    delay: Duration,
    pub invocations: Mutex<Vec<(MatrixCell, Option<Endpoint>, bool)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            delay,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, cell: &MatrixCell, behavior: SuiteBehavior) -> Self {
        self.behaviors.lock().unwrap().insert(cell.label(), behavior);
        self
    }

    pub fn invocations(&self) -> Vec<(MatrixCell, Option<Endpoint>, bool)> {
        self.invocations.lock().unwrap().clone()
    }
}

impl SuiteRunner for FakeRunner {
    async fn run(&self, invocation: SuiteInvocation<'_>) -> Result<SuiteRun, RunnerError> {
        let cell = invocation.cell.clone();
        self.invocations.lock().unwrap().push((
            cell.clone(),
            invocation.endpoint.cloned(),
            invocation.coverage_enabled,
        ));
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&cell.label())
            .copied()
            .unwrap_or(SuiteBehavior::Pass);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut report = match behavior {
            SuiteBehavior::Pass => SuiteReport::passed(counts(10, 0, 0, 1)),
            SuiteBehavior::Fail => SuiteReport::failed(counts(10, 2, 0, 1)),
            SuiteBehavior::Malformed => SuiteReport::passed(counts(10, 3, 0, 0)),
            SuiteBehavior::Infrastructure => {
                return Err(RunnerError::Infrastructure("interpreter not found".to_string()));
            }
            SuiteBehavior::Hang => {
                // Leaves partial output behind the way a real suite run does.
                fs::write(
                    invocation.job_dir.join(SUITE_LOG_FILE),
                    format!("started {}\n", cell.label()),
                )
                .unwrap();
                std::future::pending::<()>().await;
                unreachable!()
            }
            SuiteBehavior::Panic => panic!("suite harness crashed"),
        };
        if invocation.coverage_enabled {
            report = report.with_coverage(CoverageBlob(cell.label().into_bytes()));
        }
        Ok(SuiteRun {
            report,
            output: format!("ran {}\n", cell.label()),
        })
    }
}
