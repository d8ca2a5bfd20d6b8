use crate::fallback::no_handler_page;
use crate::load_balancer::{LoadBalanceConfig, LoadBalancer, SelectionKind};
use crate::request::CgiRequest;
use crate::spawner::{SpawnRequest, Spawner};
use cgirelay_client::{Connector, WorkerConnection};
use cgirelay_common::form::take_field;
use cgirelay_common::{Env, Result, SessionKey, WorkerMessage, SESSION_KEY_FIELD};
use cgirelay_registry::{OsProcessTable, ProcessTable, Registry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// What the dispatcher serves.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// URL of the CGI script, used for the restart link of the fallback page
    pub url: String,
    /// Base port name of the worker program
    pub base_port: String,
    /// Worker program to start when no instance is running
    pub program: PathBuf,
    /// Idle timeout passed to new workers as `-servertimeout`
    pub server_timeout_ms: Option<u64>,
    pub load_balance: LoadBalanceConfig,
}

impl DispatchConfig {
    pub fn new(url: impl Into<String>, base_port: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            base_port: base_port.into(),
            program: program.into(),
            server_timeout_ms: None,
            load_balance: LoadBalanceConfig::default(),
        }
    }

    fn server_args(&self) -> Vec<String> {
        match self.server_timeout_ms {
            Some(ms) => vec!["-servertimeout".to_string(), ms.to_string()],
            None => Vec::new(),
        }
    }
}

/// Result of looking for a worker.
#[derive(Debug)]
pub enum Located {
    /// A worker was already listening
    Connected(WorkerConnection),
    /// A worker was started and answered the retry
    SpawnedAndRetried(WorkerConnection),
    /// Nobody answered
    Absent,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The worker's response was streamed to the caller
    Forwarded {
        port: String,
        spawned: bool,
        bytes: u64,
    },
    /// No worker could take the request; the fallback page was written
    NoHandler { port: String },
}

/// Routes one request to a worker, starting one if needed.
///
/// # State Machine
///
/// ```text
/// Classify ──no SCRIPTKEY──> NewSession ──load balancer──> Locate
///          └─SCRIPTKEY─────> Continuation ───────────────> Locate
///
/// Locate ── connected ─────────────────> Forward ──> Done
///        ── absent, new session ───────> Spawn ──> Locate again
///                                          └─ still absent ──> NoHandler
///        ── absent, continuation ──────> NoHandler
/// ```
pub struct Dispatcher<P: ProcessTable = OsProcessTable> {
    connector: Connector,
    registry: Arc<Registry<P>>,
    spawner: Arc<dyn Spawner>,
    balancer: LoadBalancer,
    config: DispatchConfig,
}

impl<P: ProcessTable + 'static> Dispatcher<P> {
    pub fn new(
        connector: Connector,
        registry: Arc<Registry<P>>,
        spawner: Arc<dyn Spawner>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            balancer: LoadBalancer::new(config.load_balance.clone()),
            connector,
            registry,
            spawner,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Handles `request`, writing the worker's response (or the fallback page) to `out`.
    ///
    /// Fails only on undecodable form input and on I/O errors towards `out`.
    pub async fn dispatch<W>(&self, request: &CgiRequest, out: &mut W) -> Result<Outcome>
    where
        W: AsyncWrite + Unpin,
    {
        let mut form_env = request.form_env()?;
        let base = self.config.base_port.as_str();

        match take_field(&mut form_env, SESSION_KEY_FIELD) {
            Some(raw_key) => {
                let key = match SessionKey::parse(&raw_key) {
                    Ok(key) => key,
                    Err(e) => {
                        tracing::warn!("Malformed session key: {}", e);
                        return self.no_handler(request, base.to_string(), out).await;
                    }
                };
                let port = key.port_for(base);
                tracing::debug!("Continuation for '{}'", port);

                match self.locate(&port, &key, false).await {
                    Located::Absent => self.no_handler(request, port, out).await,
                    located => self.forward(located, request, form_env, port, out).await,
                }
            }
            None => {
                let program = self.config.program.to_string_lossy();
                let selection = self
                    .balancer
                    .select(&self.connector, &self.registry, &program, base)
                    .await?;
                tracing::debug!("New session on '{}' ({:?})", selection.port, selection.kind);

                let located = if selection.kind == SelectionKind::Fresh {
                    self.spawn_and_retry(&selection.port, &selection.key).await
                } else {
                    self.locate(&selection.port, &selection.key, true).await
                };

                match located {
                    Located::Absent => self.no_handler(request, selection.port, out).await,
                    located => {
                        self.forward(located, request, form_env, selection.port, out)
                            .await
                    }
                }
            }
        }
    }

    /// Connects to `port`; for a new session, spawns a worker if nobody answers.
    pub async fn locate(&self, port: &str, key: &SessionKey, may_spawn: bool) -> Located {
        if let Some(conn) = self.connector.connect(port).await {
            return Located::Connected(conn);
        }
        if !may_spawn {
            tracing::info!("No worker on '{}' for continuation", port);
            return Located::Absent;
        }
        self.spawn_and_retry(port, key).await
    }

    async fn spawn_and_retry(&self, port: &str, key: &SessionKey) -> Located {
        let request = SpawnRequest {
            program: self.config.program.clone(),
            server_args: self.config.server_args(),
            port: port.to_string(),
            key: key.clone(),
        };

        if let Err(e) = self.spawner.spawn(&request) {
            tracing::error!("{}", e);
            return Located::Absent;
        }

        match self.connector.connect(port).await {
            Some(conn) => Located::SpawnedAndRetried(conn),
            None => {
                tracing::warn!("Spawned worker for '{}' did not answer", port);
                Located::Absent
            }
        }
    }

    async fn forward<W>(
        &self,
        located: Located,
        request: &CgiRequest,
        form_env: Env,
        port: String,
        out: &mut W,
    ) -> Result<Outcome>
    where
        W: AsyncWrite + Unpin,
    {
        let (mut conn, spawned) = match located {
            Located::Connected(conn) => (conn, false),
            Located::SpawnedAndRetried(conn) => (conn, true),
            Located::Absent => return self.no_handler(request, port, out).await,
        };

        let message = WorkerMessage::submit(request.server_env.clone(), form_env);
        if let Err(e) = conn.send(&message).await {
            tracing::warn!("Failed to send to '{}': {}", port, e);
            return self.no_handler(request, port, out).await;
        }

        // Nothing reaches `out` until the worker has started answering
        let first_line = match conn.read_reply_line().await {
            Ok(line) if !line.is_empty() => line,
            Ok(_) => {
                tracing::warn!("Worker '{}' closed the connection without answering", port);
                return self.no_handler(request, port, out).await;
            }
            Err(e) => {
                tracing::warn!("No answer from '{}': {}", port, e);
                return self.no_handler(request, port, out).await;
            }
        };

        let bytes = conn.forward_reply(first_line, out).await?;
        tracing::debug!("Forwarded {} bytes from '{}'", bytes, port);

        Ok(Outcome::Forwarded {
            port,
            spawned,
            bytes,
        })
    }

    async fn no_handler<W>(&self, request: &CgiRequest, port: String, out: &mut W) -> Result<Outcome>
    where
        W: AsyncWrite + Unpin,
    {
        let page = no_handler_page(&self.config.url, request.query_string());
        out.write_all(&page.to_bytes()).await?;
        out.flush().await?;
        Ok(Outcome::NoHandler { port })
    }
}
