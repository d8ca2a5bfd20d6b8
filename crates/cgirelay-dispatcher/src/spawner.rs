use cgirelay_common::config::{REGISTRY_ENV, RUNTIME_DIR_ENV};
use cgirelay_common::{RelayConfig, RelayError, Result, SessionKey};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// What to start for a new worker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    /// Options placed before `-port`, such as `-servertimeout <ms>`
    pub server_args: Vec<String>,
    pub port: String,
    pub key: SessionKey,
}

impl SpawnRequest {
    /// `[server_args] -port <port> -scriptkey <key>`
    pub fn args(&self) -> Vec<String> {
        let mut args = self.server_args.clone();
        args.extend([
            "-port".to_string(),
            self.port.clone(),
            "-scriptkey".to_string(),
            self.key.to_string(),
        ]);
        args
    }
}

/// Starts worker processes.
pub trait Spawner: Send + Sync {
    /// Starts the worker detached. Returns its pid.
    fn spawn(&self, request: &SpawnRequest) -> Result<u32>;
}

/// Spawns workers as detached OS processes.
///
/// The child gets its own process group and null standard streams, and is
/// never waited for: it outlives the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    env: Vec<(&'static str, PathBuf)>,
}

impl ProcessSpawner {
    /// Spawner whose workers use the runtime directory and registry of `relay`,
    /// whatever their inherited environment says.
    pub fn for_relay(relay: &RelayConfig) -> Self {
        Self {
            env: vec![
                (RUNTIME_DIR_ENV, relay.runtime_dir.clone()),
                (REGISTRY_ENV, relay.registry_path.clone()),
            ],
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32> {
        let child = Command::new(&request.program)
            .args(request.args())
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                RelayError::Spawn(format!("{}: {}", request.program.display(), e))
            })?;

        let pid = child.id();
        tracing::info!(
            "Spawned {} for port '{}' (pid {})",
            request.program.display(),
            request.port,
            pid
        );
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_arguments() {
        let request = SpawnRequest {
            program: PathBuf::from("/srv/cgi/shop"),
            server_args: vec!["-servertimeout".to_string(), "9000".to_string()],
            port: "shop.k1".to_string(),
            key: SessionKey::parse("k1").unwrap(),
        };
        assert_eq!(
            request.args(),
            vec!["-servertimeout", "9000", "-port", "shop.k1", "-scriptkey", "k1"]
        );
    }

    #[test]
    fn test_canonical_key_is_empty_argument() {
        let request = SpawnRequest {
            program: PathBuf::from("/srv/cgi/shop"),
            server_args: vec![],
            port: "shop".to_string(),
            key: SessionKey::canonical(),
        };
        assert_eq!(request.args(), vec!["-port", "shop", "-scriptkey", ""]);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let request = SpawnRequest {
            program: PathBuf::from("/nonexistent/cgirelay-worker"),
            server_args: vec![],
            port: "p".to_string(),
            key: SessionKey::canonical(),
        };
        assert!(matches!(
            ProcessSpawner::default().spawn(&request),
            Err(RelayError::Spawn(_))
        ));
    }
}
