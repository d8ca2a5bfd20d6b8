//! Concurrency tests for the registry
//!
//! Many threads append and remove entries against the same table; the lock
//! must serialize them so no update is lost.

use cgirelay_common::Result;
use cgirelay_registry::{LockConfig, ProcessTable, Registry, WorkerRecord};
use std::path::Path;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

/// Every pid is alive.
struct AllAlive;

impl ProcessTable for AllAlive {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }

    fn terminate(&self, _pid: u32) -> Result<()> {
        Ok(())
    }
}

/// Only even pids are alive.
struct EvenAlive;

impl ProcessTable for EvenAlive {
    fn is_alive(&self, pid: u32) -> bool {
        pid % 2 == 0
    }

    fn terminate(&self, _pid: u32) -> Result<()> {
        Ok(())
    }
}

/// Registry with a lock bound suited to heavy contention.
fn open<P: ProcessTable>(path: &Path, processes: P) -> Registry<P> {
    Registry::new(path, processes).with_lock_config(LockConfig {
        timeout_ms: 30_000,
        poll_interval_ms: 1,
    })
}

#[test]
fn test_concurrent_append_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("registry"));
    let threads = 8u32;
    let per_thread = 25u32;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                // Each thread has its own handle, and therefore its own lock descriptor
                let registry = open(&path, AllAlive);
                for i in 0..per_thread {
                    let pid = t * 1000 + i + 1;
                    registry
                        .append(&WorkerRecord::new(pid, "/p/w", format!("w{}-{}", t, i)))
                        .unwrap();
                }
                for i in (0..per_thread).filter(|i| i % 3 == 0) {
                    let pid = t * 1000 + i + 1;
                    assert!(registry.remove(pid, &format!("w{}-{}", t, i)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected: HashSet<String> = (0..threads)
        .flat_map(|t| {
            (0..per_thread)
                .filter(|i| i % 3 != 0)
                .map(move |i| format!("w{}-{}", t, i))
        })
        .collect();

    let registry = open(&path, AllAlive);
    let records = registry.records().unwrap();
    let ports: HashSet<String> = records.iter().map(|r| r.port.clone()).collect();

    assert_eq!(records.len(), expected.len());
    assert_eq!(ports, expected);
}

#[test]
fn test_concurrent_reconcile_with_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("registry"));

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let registry = open(&path, EvenAlive);
                for i in 0..20u32 {
                    let pid = t * 100 + i;
                    registry
                        .append(&WorkerRecord::new(pid, "/p/w", format!("p{}", pid)))
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let registry = open(&path, EvenAlive);
                for _ in 0..20 {
                    let live = registry.read_live().unwrap();
                    assert!(live.iter().all(|r| r.pid % 2 == 0));
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let registry = open(&path, EvenAlive);
    let live = registry.read_live().unwrap();
    assert_eq!(live.len(), 40);
    assert_eq!(registry.records().unwrap(), live);
}
