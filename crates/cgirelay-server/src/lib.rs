//! cgirelay Worker Server
//!
//! This crate provides the worker side of the cgirelay protocol. A worker
//! program implements [`FormHandler`] and hands it to [`WorkerServer`], which
//! binds the port's socket, registers in the registry and answers dispatchers
//! and admin commands until it is stopped.

pub mod args;
pub mod handler;
pub mod worker;

pub use args::WorkerArgs;
pub use handler::FormHandler;
pub use worker::{run_worker, ShutdownHandle, WorkerConfig, WorkerServer, WorkerStats};
