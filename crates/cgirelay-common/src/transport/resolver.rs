//! Name resolution for worker ports.
//!
//! Workers are addressed by logical port names. A [`NameResolver`] turns a port
//! name into the Unix socket the worker listens on.

use std::path::{Path, PathBuf};

use crate::protocol::error::{RelayError, Result};

/// Locality suffix appended to every port name.
pub const LOCALITY_SUFFIX: &str = "@localhost";

/// Longest socket path accepted (`sun_path` is 104 bytes on the BSDs, 108 on Linux).
pub const MAX_SOCKET_PATH: usize = 104;

/// Maps logical port names to socket paths.
pub trait NameResolver: Send + Sync {
    /// Returns the socket path for `port`.
    fn resolve(&self, port: &str) -> Result<PathBuf>;
}

/// Resolves ports to `<socket_dir>/<port>@localhost`.
#[derive(Debug, Clone)]
pub struct SocketDirResolver {
    socket_dir: PathBuf,
}

impl SocketDirResolver {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }
}

impl NameResolver for SocketDirResolver {
    fn resolve(&self, port: &str) -> Result<PathBuf> {
        if port.is_empty() {
            return Err(RelayError::Resolve(port.to_string()));
        }

        let name = format!("{}{}", sanitize_port_name(port), LOCALITY_SUFFIX);
        let path = self.socket_dir.join(name);

        if path.as_os_str().len() >= MAX_SOCKET_PATH {
            tracing::debug!(
                "Socket path for '{}' is {} bytes, limit {}",
                port,
                path.as_os_str().len(),
                MAX_SOCKET_PATH
            );
            return Err(RelayError::Resolve(port.to_string()));
        }

        Ok(path)
    }
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_port_name(port: &str) -> String {
    port.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
