use crate::connection::WorkerConnection;
use cgirelay_common::protocol::error::{RelayError, Result};
use cgirelay_common::transport::NameResolver;
use cgirelay_common::RelayConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::Instant;

/// Configuration for connecting to a worker.
///
/// A worker that was just spawned needs a moment to bind its socket, so failed
/// attempts are retried with exponential backoff until `timeout_ms` elapses.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Total time allowed for all attempts
    ///
    /// Default: 3000ms
    pub timeout_ms: u64,
    /// Wait after the first failed attempt
    ///
    /// Default: 20ms
    pub initial_backoff_ms: u64,
    /// Maximum wait between attempts
    ///
    /// Default: 500ms
    pub max_backoff_ms: u64,
    /// Each wait is the previous one times this
    ///
    /// Default: 2.0
    pub backoff_multiplier: f64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            initial_backoff_ms: 20,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl ConnectConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn next_backoff(&self, backoff_ms: u64) -> u64 {
        std::cmp::min(
            (backoff_ms as f64 * self.backoff_multiplier) as u64,
            self.max_backoff_ms,
        )
    }
}

/// Opens connections to workers by logical port name.
///
/// Absence of a worker is not an error: [`Connector::connect`] returns `None`
/// once the timeout has elapsed, and the caller decides whether to spawn one.
///
/// # Example
///
/// ```no_run
/// use cgirelay_client::{ConnectConfig, Connector};
/// use cgirelay_common::RelayConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = Connector::from_config(&RelayConfig::from_env(), ConnectConfig::default());
/// match connector.connect("shop").await {
///     Some(conn) => println!("shop is {:?}", conn.get_load().await?),
///     None => println!("shop is not running"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connector {
    resolver: Arc<dyn NameResolver>,
    config: ConnectConfig,
}

impl Connector {
    pub fn new(resolver: impl NameResolver + 'static, config: ConnectConfig) -> Self {
        Self {
            resolver: Arc::new(resolver),
            config,
        }
    }

    /// Connector resolving ports in the socket directory of `relay`.
    pub fn from_config(relay: &RelayConfig, config: ConnectConfig) -> Self {
        Self::new(relay.resolver(), config)
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Same resolver, different overall timeout.
    pub fn with_timeout_ms(&self, timeout_ms: u64) -> Self {
        Self {
            resolver: self.resolver.clone(),
            config: self.config.clone().with_timeout_ms(timeout_ms),
        }
    }

    /// Connects to `port`, retrying until the configured timeout.
    ///
    /// Returns `None` if no worker accepted the connection in time.
    pub async fn connect(&self, port: &str) -> Option<WorkerConnection> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let mut backoff_ms = self.config.initial_backoff_ms;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.try_connect(port, deadline).await {
                Ok(conn) => {
                    tracing::debug!("Connected to '{}' after {} attempt(s)", port, attempts);
                    return Some(conn);
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(
                            "Giving up on '{}' after {} attempt(s): {}",
                            port,
                            attempts,
                            e
                        );
                        return None;
                    }

                    let wait = Duration::from_millis(backoff_ms).min(deadline - now);
                    tracing::trace!("Connect to '{}' failed ({}), retrying in {:?}", port, e, wait);
                    tokio::time::sleep(wait).await;
                    backoff_ms = self.config.next_backoff(backoff_ms);
                }
            }
        }
    }

    /// One connection attempt, bounded by `deadline`.
    async fn try_connect(&self, port: &str, deadline: Instant) -> Result<WorkerConnection> {
        let path = self.resolver.resolve(port)?;

        let stream = tokio::time::timeout_at(deadline, UnixStream::connect(&path))
            .await
            .map_err(|_| RelayError::Connection(format!("timed out connecting to {}", path.display())))??;

        Ok(WorkerConnection::new(port, stream))
    }
}
