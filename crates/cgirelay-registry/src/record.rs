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
use std::fmt;

/// One registered worker.
///
/// Persisted as a single JSON array line: `[pid,"program","port"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerRecord {
    /// Process hosting the worker at registration time
    pub pid: u32,
    /// Absolute path of the worker program
    pub program: String,
    /// Logical port name, `<base>` or `<base>.<session key>`
    pub port: String,
}

impl WorkerRecord {
    pub fn new(pid: u32, program: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            pid,
            program: program.into(),
            port: port.into(),
        }
    }

    /// Serializes the record as one line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&(self.pid, &self.program, &self.port))?)
    }

    /// Parses one persisted line.
    pub fn from_line(line: &str) -> Result<Self> {
        let (pid, program, port): (u32, String, String) = serde_json::from_str(line.trim())
            .map_err(|e| RelayError::Registry(format!("malformed record '{}': {}", line.trim(), e)))?;

        if port.is_empty() {
            return Err(RelayError::Registry(format!(
                "record for pid {} has an empty port",
                pid
            )));
        }

        Ok(Self { pid, program, port })
    }

    /// Whether this worker runs `program`, compared as given or canonicalized.
    pub fn runs_program(&self, program: &str) -> bool {
        if self.program == program {
            return true;
        }
        match (
            std::fs::canonicalize(&self.program),
            std::fs::canonicalize(program),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Whether this record belongs to the instance chain of `base`.
    pub fn is_instance_of(&self, base: &str) -> bool {
        self.port == base
            || self
                .port
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.pid, self.port, self.program)
    }
}
