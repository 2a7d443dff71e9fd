//! # Port Allocation Module / 端口分配模块
//!
//! Hands out ephemeral TCP ports to concurrently provisioned servers. Every
//! allocation goes through one lock so two live jobs never receive the same
//! port; a lease returns its port to the pool when dropped.
//!
//! 为并发启动的服务器分配临时 TCP 端口。所有分配都经过同一把锁，
//! 因此两个存活的作业永远不会得到相同的端口；租约在被丢弃时归还端口。

use std::collections::BTreeSet;
use std::io;
use std::net::TcpListener;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How many times the OS is asked for a fresh port before giving up.
const MAX_ALLOCATION_ATTEMPTS: usize = 64;

#[derive(Debug, Default)]
pub struct PortPool {
    in_use: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserves a port that is currently free on `host` and not leased to any
    /// other job.
    pub fn allocate(self: &Arc<Self>, host: &str) -> io::Result<PortLease> {
        let mut in_use = self.lock();
        let mut bind_error = None;
        let candidates = (0..MAX_ALLOCATION_ATTEMPTS).map_while(|_| match ephemeral_port(host) {
            Ok(port) => Some(port),
            Err(e) => {
                bind_error = Some(e);
                None
            }
        });
        if let Some(port) = claim_first_free(&mut in_use, candidates) {
            return Ok(PortLease {
                port,
                pool: Arc::clone(self),
            });
        }
        match bind_error {
            Some(e) => Err(e),
            None => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("no free ephemeral port on {host} after {MAX_ALLOCATION_ATTEMPTS} attempts"),
            )),
        }
    }

    /// Number of ports currently leased.
    pub fn leased(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, port: u16) {
        self.lock().remove(&port);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claims the first candidate not yet in `in_use`.
///
/// `PortPool::allocate` calls this while holding the pool lock, so the check
/// and the insert are one step for concurrent callers.
pub fn claim_first_free(
    in_use: &mut BTreeSet<u16>,
    candidates: impl IntoIterator<Item = u16>,
) -> Option<u16> {
    candidates.into_iter().find(|port| in_use.insert(*port))
}

/// Asks the OS for a port that is free on `host` right now.
///
/// The listener is dropped right away; the lease keeps other jobs of this run
/// off the port until the server binds it.
fn ephemeral_port(host: &str) -> io::Result<u16> {
    Ok(TcpListener::bind((host, 0))?.local_addr()?.port())
}

/// An exclusive claim on one port, released on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<PortPool>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}
