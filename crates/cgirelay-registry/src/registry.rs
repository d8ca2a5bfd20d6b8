use crate::process::{OsProcessTable, ProcessTable};
use crate::record::WorkerRecord;
use cgirelay_common::{RelayConfig, RelayError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for registry lock acquisition.
///
/// The lock is taken non-blocking and retried every `poll_interval_ms` until
/// `timeout_ms` has elapsed.
///
/// # Default Values
///
/// - **timeout_ms**: 5000ms
/// - **poll_interval_ms**: 10ms
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up after this many milliseconds
    pub timeout_ms: u64,
    /// Delay between attempts in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            poll_interval_ms: 10,
        }
    }
}

/// Persisted table of live workers.
///
/// Every operation runs under an exclusive `flock(2)` on the sidecar file
/// `<registry>.lock`, so reads, reconciling rewrites, appends and removals
/// from concurrent processes are serialized. Rewrites go through
/// `<registry>.tmp` and a rename, so the table is never half written.
///
/// # Malformed Lines
///
/// A line that does not parse is logged and skipped; the next rewrite drops it.
///
/// # Example
///
/// ```no_run
/// use cgirelay_common::RelayConfig;
/// use cgirelay_registry::{Registry, WorkerRecord};
///
/// let registry = Registry::open(&RelayConfig::from_env());
/// registry.append(&WorkerRecord::new(std::process::id(), "/srv/cgi/shop", "shop"))?;
/// for record in registry.read_live()? {
///     println!("{}", record);
/// }
/// # Ok::<(), cgirelay_common::RelayError>(())
/// ```
pub struct Registry<P: ProcessTable = OsProcessTable> {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
    processes: P,
    lock_config: LockConfig,
}

impl Registry<OsProcessTable> {
    /// Opens the registry named by `config`, checking real processes.
    pub fn open(config: &RelayConfig) -> Self {
        Self::new(&config.registry_path, OsProcessTable)
    }
}

impl<P: ProcessTable> Registry<P> {
    pub fn new(path: impl AsRef<Path>, processes: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            lock_path: sidecar(&path, "lock"),
            tmp_path: sidecar(&path, "tmp"),
            path,
            processes,
            lock_config: LockConfig::default(),
        }
    }

    pub fn with_lock_config(mut self, lock_config: LockConfig) -> Self {
        self.lock_config = lock_config;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    /// Returns the live records, rewriting the table without the dead ones.
    pub fn read_live(&self) -> Result<Vec<WorkerRecord>> {
        let _lock = self.lock()?;
        let (records, skipped) = self.load()?;
        let total = records.len();

        let live: Vec<WorkerRecord> = records
            .into_iter()
            .filter(|record| {
                let alive = self.processes.is_alive(record.pid);
                if !alive {
                    tracing::info!("Dropping stale registry entry {}", record);
                }
                alive
            })
            .collect();

        if live.len() != total || skipped > 0 {
            self.rewrite(&live)?;
        }

        Ok(live)
    }

    /// Adds `record`, replacing any entry already holding its port.
    pub fn append(&self, record: &WorkerRecord) -> Result<()> {
        self.with_lock(|locked| locked.append(record))
    }

    /// Runs `op` while holding the registry lock.
    ///
    /// Other registry operations, in this process or another, wait until `op`
    /// returns. Inside `op` the registry is reached through [`Locked`], whose
    /// operations do not take the lock again.
    pub fn with_lock<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Locked<'_, P>) -> Result<T>,
    {
        let _lock = self.lock()?;
        op(&Locked { registry: self })
    }

    fn append_locked(&self, record: &WorkerRecord) -> Result<()> {
        let line = record.to_line()?;
        let (mut records, skipped) = self.load()?;

        let before = records.len();
        records.retain(|r| r.port != record.port);

        if records.len() != before || skipped > 0 {
            tracing::debug!("Replacing registry entries for port '{}'", record.port);
            records.push(record.clone());
            return self.rewrite(&records);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error("open", e))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .map_err(|e| self.error("append to", e))?;

        tracing::debug!("Registered {}", record);
        Ok(())
    }

    /// Removes the entry matching both `pid` and `port`. Returns whether one existed.
    pub fn remove(&self, pid: u32, port: &str) -> Result<bool> {
        let _lock = self.lock()?;
        let (mut records, skipped) = self.load()?;

        let before = records.len();
        records.retain(|r| !(r.pid == pid && r.port == port));
        let removed = records.len() != before;

        if removed || skipped > 0 {
            self.rewrite(&records)?;
        }
        if removed {
            tracing::debug!("Unregistered pid {} port '{}'", pid, port);
        }

        Ok(removed)
    }

    /// The persisted table as is, without liveness checks.
    pub fn records(&self) -> Result<Vec<WorkerRecord>> {
        let _lock = self.lock()?;
        Ok(self.load()?.0)
    }

    fn lock(&self) -> Result<Flock<File>> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.error("create directory for", e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.error("open lock for", e))?;

        let timeout = Duration::from_millis(self.lock_config.timeout_ms);
        let poll = Duration::from_millis(self.lock_config.poll_interval_ms.max(1));
        let start = Instant::now();

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => return Ok(lock),
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
                    if start.elapsed() >= timeout {
                        tracing::warn!(
                            "Registry lock {} still held after {}ms",
                            self.lock_path.display(),
                            self.lock_config.timeout_ms
                        );
                        return Err(RelayError::RegistryLocked(self.lock_config.timeout_ms));
                    }
                    file = returned;
                    std::thread::sleep(poll);
                }
                Err((_, errno)) => {
                    return Err(RelayError::Registry(format!(
                        "cannot lock {}: {}",
                        self.lock_path.display(),
                        errno
                    )));
                }
            }
        }
    }

    /// Loads the table. Returns the parsed records and the number of skipped lines.
    fn load(&self) -> Result<(Vec<WorkerRecord>, usize)> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(self.error("read", e)),
        };

        let mut records = Vec::new();
        let mut skipped = 0;
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match WorkerRecord::from_line(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "Skipping line {} of {}: {}",
                        index + 1,
                        self.path.display(),
                        e
                    );
                    skipped += 1;
                }
            }
        }

        Ok((records, skipped))
    }

    fn rewrite(&self, records: &[WorkerRecord]) -> Result<()> {
        let mut content = String::new();
        for record in records {
            content.push_str(&record.to_line()?);
            content.push('\n');
        }

        let mut file = File::create(&self.tmp_path).map_err(|e| self.error("create temp file for", e))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.error("write temp file for", e))?;
        std::fs::rename(&self.tmp_path, &self.path).map_err(|e| self.error("replace", e))?;

        Ok(())
    }

    fn error(&self, action: &str, e: std::io::Error) -> RelayError {
        RelayError::Registry(format!("cannot {} {}: {}", action, self.path.display(), e))
    }
}

impl<P: ProcessTable + 'static> Registry<P> {
    /// Runs `op` against `registry` on the blocking thread pool.
    ///
    /// Registry operations poll a file lock and sync to disk; async callers go
    /// through here so a runtime worker thread never waits on them.
    pub async fn run_blocking<T, F>(registry: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(&Registry<P>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(registry);
        tokio::task::spawn_blocking(move || op(&registry))
            .await
            .map_err(|e| RelayError::Registry(format!("registry task failed: {}", e)))?
    }
}

/// The registry while its lock is held. See [`Registry::with_lock`].
pub struct Locked<'a, P: ProcessTable> {
    registry: &'a Registry<P>,
}

impl<P: ProcessTable> Locked<'_, P> {
    /// Same as [`Registry::append`].
    pub fn append(&self, record: &WorkerRecord) -> Result<()> {
        self.registry.append_locked(record)
    }

    /// Same as [`Registry::records`].
    pub fn records(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.registry.load()?.0)
    }
}

/// `<path>.<ext>` next to the registry file.
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
