// Copyright 2025 cgirelay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use cgirelay_common::{RelayError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Liveness checks and termination of worker processes.
///
/// The registry never touches processes directly; everything goes through this
/// trait so tests can substitute a fake process table.
pub trait ProcessTable: Send + Sync {
    /// Whether `pid` still names a running process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Forcibly terminates `pid`.
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Process table backed by `kill(2)`.
///
/// Signal 0 performs the permission and existence checks without delivering
/// anything; only `ESRCH` means the process is gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        !matches!(kill(pid, None), Err(Errno::ESRCH))
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let target = to_pid(pid)
            .ok_or_else(|| RelayError::Registry(format!("refusing to signal pid {}", pid)))?;

        match kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RelayError::Registry(format!("cannot kill {}: {}", pid, e))),
        }
    }
}

/// Pids 0 and anything outside `i32` would address process groups.
fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}
