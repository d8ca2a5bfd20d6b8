//! Worker protocol server.
//!
//! A worker binds a Unix socket named after its port, registers itself in the
//! registry and then answers one protocol message per connection until it is
//! told to stop, stays idle past its timeout, or receives Ctrl-C. On the way
//! out it unregisters and deletes its socket file.
//!
//! # Example
//!
//! ```no_run
//! use cgirelay_common::{Document, Env, RelayConfig};
//! use cgirelay_server::{FormHandler, WorkerConfig, WorkerServer};
//!
//! struct Hello;
//!
//! impl FormHandler for Hello {
//!     fn submit(&self, _server_env: &Env, _form_env: &Env) -> Document {
//!         Document::html("<p>hello</p>")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> cgirelay_common::Result<()> {
//!     let server = WorkerServer::bind(&RelayConfig::from_env(), "hello", Hello, WorkerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

use crate::args::WorkerArgs;
use crate::handler::FormHandler;
use cgirelay_common::transport::{LineCodec, NameResolver};
use cgirelay_common::{Document, Env, Load, RelayConfig, RelayError, Result, WorkerMessage};
use cgirelay_registry::{Registry, WorkerRecord};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// Worker configuration.
///
/// # Default Values
///
/// - **server_timeout_ms**: 1800000ms (30 minutes)
/// - **idle_check_interval_ms**: 1000ms
/// - **program**: the running executable
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Shut down after this long without a submission
    pub server_timeout_ms: u64,
    /// How often the idle timeout is checked
    pub idle_check_interval_ms: u64,
    /// Program path recorded in the registry
    pub program: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_timeout_ms: 30 * 60 * 1000,
            idle_check_interval_ms: 1000,
            program: None,
        }
    }
}

/// Counters describing a running worker.
#[derive(Debug)]
pub struct WorkerStats {
    started: Instant,
    submits: AtomicU64,
    messages: AtomicU64,
    in_flight: AtomicUsize,
    last_submit: Mutex<Instant>,
}

impl WorkerStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            submits: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            last_submit: Mutex::new(now),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Submissions completed
    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::Relaxed)
    }

    /// Protocol messages received, of any kind
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Whether a submission is running or queued.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Time since the last submission finished (or since start).
    pub fn idle_for(&self) -> Duration {
        if self.is_busy() {
            return Duration::ZERO;
        }
        self.last_submit
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_submit.lock() {
            *last = Instant::now();
        }
    }
}

struct Shared {
    handler: Arc<dyn FormHandler>,
    submit_lock: tokio::sync::Mutex<()>,
    stats: WorkerStats,
    record: WorkerRecord,
    config: WorkerConfig,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn request_shutdown(&self, reason: &str) {
        tracing::info!("Worker '{}' shutting down: {}", self.record.port, reason);
        self.shutdown.send_replace(true);
    }

    fn idle_expired(&self) -> bool {
        !self.stats.is_busy()
            && self.stats.idle_for() > Duration::from_millis(self.config.server_timeout_ms)
    }
}

/// Handle that stops a running [`WorkerServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shared.request_shutdown("requested");
    }
}

/// A bound and registered worker.
pub struct WorkerServer {
    listener: UnixListener,
    socket_path: PathBuf,
    registry: Arc<Registry>,
    shared: Arc<Shared>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerServer {
    /// Binds the socket for `port` and registers the worker.
    ///
    /// A socket file nobody listens on is removed first. The check, the bind
    /// and the registration happen under the registry lock, so two workers
    /// starting on the same port cannot both take it. Registration is rolled
    /// back if it fails.
    pub async fn bind<H: FormHandler>(
        relay: &RelayConfig,
        port: &str,
        handler: H,
        config: WorkerConfig,
    ) -> Result<Self> {
        relay.ensure_dirs()?;
        let socket_path = relay.resolver().resolve(port)?;
        let program = match &config.program {
            Some(program) => program.clone(),
            None => current_program()?,
        };

        let record = WorkerRecord::new(std::process::id(), program.to_string_lossy(), port);
        let registry = Arc::new(Registry::open(relay));

        let claimed = {
            let record = record.clone();
            let socket_path = socket_path.clone();
            Registry::run_blocking(&registry, move |registry| {
                registry.with_lock(|locked| {
                    let listener = claim_socket(&record.port, &socket_path)?;
                    if let Err(e) = locked.append(&record) {
                        let _ = std::fs::remove_file(&socket_path);
                        return Err(e);
                    }
                    Ok(listener)
                })
            })
            .await?
        };
        let listener = UnixListener::from_std(claimed)?;

        tracing::info!("Worker '{}' listening on {}", port, socket_path.display());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            handler: Arc::new(handler),
            submit_lock: tokio::sync::Mutex::new(()),
            stats: WorkerStats::new(),
            record,
            config,
            shutdown,
        });

        Ok(Self {
            listener,
            socket_path,
            registry,
            shared,
            shutdown_rx,
        })
    }

    pub fn record(&self) -> &WorkerRecord {
        &self.shared.record
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.shared.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: self.shared.clone(),
        }
    }

    /// Serves connections until shutdown, then unregisters.
    pub async fn run(mut self) -> Result<()> {
        let mut idle_check = tokio::time::interval(Duration::from_millis(
            self.shared.config.idle_check_interval_ms.max(1),
        ));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(shared, stream).await {
                                    tracing::warn!("Error serving connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => break,
                _ = idle_check.tick() => {
                    if self.shared.idle_expired() {
                        self.shared.request_shutdown("idle timeout");
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    self.shared.request_shutdown("interrupted");
                    break;
                }
            }
        }

        self.unregister().await
    }

    async fn unregister(self) -> Result<()> {
        let record = self.shared.record.clone();
        drop(self.listener);

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", self.socket_path.display(), e);
            }
        }

        let (pid, port) = (record.pid, record.port.clone());
        Registry::run_blocking(&self.registry, move |registry| registry.remove(pid, &port)).await?;
        tracing::info!("Worker '{}' unregistered", record.port);
        Ok(())
    }
}

/// Binds and runs a worker configured from its command line.
///
/// `-servertimeout` overrides `config.server_timeout_ms`.
pub async fn run_worker<H: FormHandler>(
    relay: &RelayConfig,
    args: &WorkerArgs,
    handler: H,
    mut config: WorkerConfig,
) -> Result<()> {
    if let Some(ms) = args.server_timeout_ms {
        config.server_timeout_ms = ms;
    }
    let server = WorkerServer::bind(relay, &args.port, handler, config).await?;
    server.run().await
}

/// Binds `socket_path`, taking it over if the socket left there is dead.
fn claim_socket(port: &str, socket_path: &Path) -> Result<std::os::unix::net::UnixListener> {
    if socket_path.exists() {
        if std::os::unix::net::UnixStream::connect(socket_path).is_ok() {
            return Err(RelayError::Config(format!(
                "port '{}' is already served at {}",
                port,
                socket_path.display()
            )));
        }
        tracing::debug!("Removing stale socket {}", socket_path.display());
        std::fs::remove_file(socket_path)?;
    }

    let listener = std::os::unix::net::UnixListener::bind(socket_path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

async fn handle_connection(shared: Arc<Shared>, stream: UnixStream) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let Some(message) = LineCodec::read_message(&mut reader).await? else {
        return Ok(());
    };
    shared.stats.messages.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("Worker '{}' received {}", shared.record.port, message.name());

    match message {
        WorkerMessage::Submit {
            server_env,
            form_env,
        } => {
            let doc = submit(&shared, server_env, form_env).await?;
            writer.write_all(&doc.to_bytes()).await?;
        }
        WorkerMessage::GetLoad => {
            let load = if shared.stats.is_busy() {
                Load::Busy
            } else {
                Load::Idle
            };
            writer.write_all(load.as_line().as_bytes()).await?;
        }
        WorkerMessage::SketchStatus => {
            writer.write_all(&sketch_status(&shared).to_bytes()).await?;
        }
        WorkerMessage::ShowStatus => {
            writer.write_all(&show_status(&shared).to_bytes()).await?;
        }
        WorkerMessage::SketchHandlers => {
            let names = shared.handler.handler_names();
            let mut body = format!("{} handlers\n", names.len());
            for name in names {
                body.push_str(&name);
                body.push('\n');
            }
            writer.write_all(&Document::text(body).to_bytes()).await?;
        }
        WorkerMessage::CleanServer => {
            let handler = shared.handler.clone();
            let purged = tokio::task::spawn_blocking(move || handler.purge_expired())
                .await
                .map_err(|e| RelayError::Connection(format!("purge task failed: {}", e)))?;

            let expired = shared.idle_expired();
            let mut body = format!("{}: purged {} expired entries\n", shared.record.port, purged);
            if expired {
                body.push_str("idle past server timeout, terminating\n");
            }
            writer.write_all(&Document::text(body).to_bytes()).await?;
            writer.flush().await?;

            if expired {
                shared.request_shutdown("idle past server timeout");
            }
        }
        WorkerMessage::StopCgiServer => {
            shared.request_shutdown("stop requested");
        }
    }

    writer.flush().await?;
    Ok(())
}

/// Runs the handler under the single-request lock.
async fn submit(shared: &Arc<Shared>, server_env: Env, form_env: Env) -> Result<Document> {
    shared.stats.in_flight.fetch_add(1, Ordering::SeqCst);
    let result = {
        let _guard = shared.submit_lock.lock().await;
        let handler = shared.handler.clone();
        tokio::task::spawn_blocking(move || handler.submit(&server_env, &form_env)).await
    };
    shared.stats.touch();
    shared.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

    match result {
        Ok(doc) => {
            shared.stats.submits.fetch_add(1, Ordering::Relaxed);
            Ok(doc)
        }
        Err(e) => {
            tracing::error!("Form handler failed: {}", e);
            Ok(Document::html(
                "<html><body><h1>Internal error</h1><p>The form handler failed.</p></body></html>",
            )
            .with_header("Status", "500 Internal Server Error"))
        }
    }
}

fn sketch_status(shared: &Shared) -> Document {
    let stats = &shared.stats;
    Document::text(format!(
        "{} pid {} {} requests {} idle {}s\n",
        shared.record.port,
        shared.record.pid,
        if stats.is_busy() { "busy" } else { "idle" },
        stats.submits(),
        stats.idle_for().as_secs()
    ))
}

fn show_status(shared: &Shared) -> Document {
    let stats = &shared.stats;
    let lines = [
        ("port", shared.record.port.clone()),
        ("pid", shared.record.pid.to_string()),
        ("program", shared.record.program.clone()),
        ("state", if stats.is_busy() { "busy" } else { "idle" }.to_string()),
        ("uptime", format!("{}s", stats.uptime().as_secs())),
        ("requests", stats.submits().to_string()),
        ("messages", stats.messages().to_string()),
        ("idle", format!("{}s", stats.idle_for().as_secs())),
        ("server timeout", format!("{}ms", shared.config.server_timeout_ms)),
    ];

    let mut body = String::new();
    for (name, value) in lines {
        body.push_str(&format!("{}: {}\n", name, value));
    }
    Document::text(body)
}

fn current_program() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.canonicalize().unwrap_or(exe))
}
