//! # Port Pool Unit Tests / 端口池单元测试

use std::collections::{BTreeSet, HashSet};
use xmpp_e2e_matrix::infra::ports::{claim_first_free, PortPool};

#[test]
fn test_live_leases_never_share_a_port() {
    let pool = PortPool::new();
    let leases: Vec<_> = (0..16).map(|_| pool.allocate("127.0.0.1").unwrap()).collect();

    let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
    assert_eq!(ports.len(), leases.len());
    assert!(ports.iter().all(|p| *p != 0));
    assert_eq!(pool.leased(), 16);
}

#[test]
fn test_dropping_a_lease_returns_the_port() {
    let pool = PortPool::new();
    let first = pool.allocate("127.0.0.1").unwrap();
    let second = pool.allocate("127.0.0.1").unwrap();
    assert_eq!(pool.leased(), 2);

    drop(first);
    assert_eq!(pool.leased(), 1);
    drop(second);
    assert_eq!(pool.leased(), 0);
}

#[test]
fn test_concurrent_allocation_from_threads() {
    let pool = PortPool::new();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                (0..4)
                    .map(|_| pool.allocate("127.0.0.1").unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let leases: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let ports: HashSet<u16> = leases.iter().map(|l| l.port()).collect();
    assert_eq!(ports.len(), 32);
}


#[test]
fn test_claim_skips_ports_already_leased() {
    let mut in_use = BTreeSet::from([40_000, 40_001]);

    assert_eq!(claim_first_free(&mut in_use, [40_000, 40_001, 40_002]), Some(40_002));
    assert_eq!(claim_first_free(&mut in_use, [40_000, 40_002]), None);
    assert_eq!(in_use.len(), 3);
}
