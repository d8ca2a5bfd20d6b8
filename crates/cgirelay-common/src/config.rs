//! Runtime configuration shared by dispatchers, workers and admin commands.

use std::path::{Path, PathBuf};

use crate::protocol::error::{RelayError, Result};
use crate::transport::SocketDirResolver;

/// Environment variable overriding the runtime directory.
pub const RUNTIME_DIR_ENV: &str = "CGIRELAY_RUNTIME_DIR";

/// Environment variable overriding the registry file path.
pub const REGISTRY_ENV: &str = "CGIRELAY_REGISTRY";

/// Where sockets and the registry live.
///
/// # Default Values
///
/// - `runtime_dir`: `$TMPDIR/cgirelay`
/// - `registry_path`: `<runtime_dir>/registry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub runtime_dir: PathBuf,
    pub registry_path: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::with_runtime_dir(std::env::temp_dir().join("cgirelay"))
    }
}

impl RelayConfig {
    /// Config rooted at `runtime_dir`, registry inside it.
    pub fn with_runtime_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        let registry_path = runtime_dir.join("registry");
        Self {
            runtime_dir,
            registry_path,
        }
    }

    /// Defaults overridden by `CGIRELAY_RUNTIME_DIR` and `CGIRELAY_REGISTRY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key).map(PathBuf::from))
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let mut config = match lookup(RUNTIME_DIR_ENV).filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => Self::with_runtime_dir(dir),
            None => Self::default(),
        };
        if let Some(registry) = lookup(REGISTRY_ENV).filter(|p| !p.as_os_str().is_empty()) {
            config.registry_path = registry;
        }
        config
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.runtime_dir.join("sockets")
    }

    pub fn resolver(&self) -> SocketDirResolver {
        SocketDirResolver::new(self.socket_dir())
    }

    /// Creates the socket directory and the registry's parent directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir(&self.socket_dir())?;
        if let Some(parent) = self.registry_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir(parent)?;
            }
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| RelayError::Config(format!("cannot create {}: {}", path.display(), e)))
}
