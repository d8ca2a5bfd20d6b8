//! cgirelay Worker Registry
//!
//! This crate provides the crash-tolerant registry through which dispatchers,
//! workers and admin commands discover each other. There is no broker process:
//! the registry is a plain file guarded by an exclusive lock.
//!
//! # Architecture
//!
//! The registry is built around three components:
//!
//! - [`WorkerRecord`]: One registered worker (`pid`, `program`, `port`)
//! - [`Registry`]: The locked, persisted table of records
//! - [`ProcessTable`]: Liveness checks and termination ([`OsProcessTable`] in production)
//!
//! # Storage
//!
//! - **Table**: one JSON array per line, `[pid,"program","port"]`
//! - **Lock**: `flock(2)` on the sidecar `<registry>.lock`
//! - **Rewrites**: written to `<registry>.tmp`, then renamed over the table
//!
//! # Reconciliation
//!
//! [`Registry::read_live`] checks every pid and rewrites the table without the
//! dead entries, so once reconciled the file holds exactly the live workers.
//! Workers that crash without unregistering disappear on the next read.
//!
//! # Usage Example
//!
//! ```rust
//! use cgirelay_registry::{Registry, WorkerRecord};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let registry = Registry::open(&cgirelay_common::RelayConfig::with_runtime_dir(dir.path()));
//!
//! registry.append(&WorkerRecord::new(std::process::id(), "/srv/cgi/shop", "shop")).unwrap();
//! assert_eq!(registry.read_live().unwrap().len(), 1);
//! ```

mod process;
mod record;
mod registry;

pub use process::{OsProcessTable, ProcessTable};
pub use record::WorkerRecord;
pub use registry::{LockConfig, Locked, Registry};
