//! Session-start instance selection.
//!
//! Load balancing happens only when a session starts. The selected key is
//! returned to the dispatcher, which forwards to `<base>.<key>`; the worker
//! embeds the key in its pages and every later request of the session is
//! pinned to that instance.

use cgirelay_client::Connector;
use cgirelay_common::{RelayError, Result, SessionKey};
use cgirelay_registry::{ProcessTable, Registry, WorkerRecord};
use std::str::FromStr;
use std::sync::Arc;

/// How new sessions are mapped to worker instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancePolicy {
    /// Always the canonical instance, never checked for load
    #[default]
    No,
    /// Canonical instance unless busy; then an idle sibling or a new instance
    Standard,
    /// A dedicated instance per session
    Multiple,
}

impl FromStr for LoadBalancePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no" => Ok(LoadBalancePolicy::No),
            "standard" => Ok(LoadBalancePolicy::Standard),
            "multiple" => Ok(LoadBalancePolicy::Multiple),
            other => Err(RelayError::Config(format!(
                "unknown load balancing policy '{}' (expected no, standard or multiple)",
                other
            ))),
        }
    }
}

/// Load balancer configuration.
///
/// # Default Values
///
/// - **policy**: `No`
/// - **max_hops**: 4
/// - **load_check_timeout_ms**: 200ms
#[derive(Debug, Clone)]
pub struct LoadBalanceConfig {
    pub policy: LoadBalancePolicy,
    /// Longest session key the balancer will create
    ///
    /// When every instance is busy and the deepest one already has this many
    /// segments, the session is bound to that instance and queues there.
    pub max_hops: usize,
    /// Connect timeout used when asking instances for their load
    pub load_check_timeout_ms: u64,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            policy: LoadBalancePolicy::No,
            max_hops: 4,
            load_check_timeout_ms: 200,
        }
    }
}

/// How an instance was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// The canonical instance, running or not
    Canonical,
    /// An idle running instance
    Reused,
    /// A new instance that still has to be started
    Fresh,
    /// Every instance busy and the chain is at its cap; queue on the last one
    Queued,
}

/// Instance selected for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub key: SessionKey,
    pub port: String,
    pub kind: SelectionKind,
}

impl Selection {
    fn new(base: &str, key: SessionKey, kind: SelectionKind) -> Self {
        Self {
            port: key.port_for(base),
            key,
            kind,
        }
    }

    /// Whether the selected instance is known not to exist yet.
    pub fn needs_spawn(&self) -> bool {
        self.kind == SelectionKind::Fresh
    }
}

/// Selects the worker instance for a new session.
pub struct LoadBalancer {
    config: LoadBalanceConfig,
}

impl LoadBalancer {
    pub fn new(config: LoadBalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoadBalanceConfig {
        &self.config
    }

    /// Chooses the instance of `program` under `base` for a new session.
    pub async fn select<P: ProcessTable + 'static>(
        &self,
        connector: &Connector,
        registry: &Arc<Registry<P>>,
        program: &str,
        base: &str,
    ) -> Result<Selection> {
        match self.config.policy {
            LoadBalancePolicy::No => Ok(Selection::new(
                base,
                SessionKey::canonical(),
                SelectionKind::Canonical,
            )),
            LoadBalancePolicy::Multiple => Ok(Selection::new(
                base,
                SessionKey::fresh(),
                SelectionKind::Fresh,
            )),
            LoadBalancePolicy::Standard => {
                self.select_standard(connector, registry, program, base).await
            }
        }
    }

    async fn select_standard<P: ProcessTable + 'static>(
        &self,
        connector: &Connector,
        registry: &Arc<Registry<P>>,
        program: &str,
        base: &str,
    ) -> Result<Selection> {
        let quick = connector.with_timeout_ms(self.config.load_check_timeout_ms);

        let canonical = match quick.connect(base).await {
            None => {
                tracing::debug!("Canonical instance '{}' not running", base);
                return Ok(Selection::new(base, SessionKey::canonical(), SelectionKind::Canonical));
            }
            Some(conn) => conn,
        };
        if !is_busy(canonical.get_load().await, base) {
            return Ok(Selection::new(base, SessionKey::canonical(), SelectionKind::Canonical));
        }

        tracing::debug!("Canonical instance '{}' busy, looking for an idle sibling", base);

        let live = Registry::run_blocking(registry, |registry| registry.read_live()).await?;
        let mut siblings: Vec<(SessionKey, WorkerRecord)> = live
            .into_iter()
            .filter(|r| r.port != base && r.is_instance_of(base) && r.runs_program(program))
            .filter_map(|r| SessionKey::from_port(base, &r.port).map(|key| (key, r)))
            .collect();
        siblings.sort_by_key(|(key, _)| key.depth());

        let mut last_busy = SessionKey::canonical();
        for (key, record) in siblings {
            let Some(conn) = quick.connect(&record.port).await else {
                continue;
            };
            if !is_busy(conn.get_load().await, &record.port) {
                tracing::debug!("Reusing idle instance '{}'", record.port);
                return Ok(Selection::new(base, key, SelectionKind::Reused));
            }
            last_busy = key;
        }

        if last_busy.depth() >= self.config.max_hops {
            tracing::warn!(
                "All instances of '{}' busy and chain at {} hops, queueing on '{}'",
                base,
                self.config.max_hops,
                last_busy.port_for(base)
            );
            return Ok(Selection::new(base, last_busy, SelectionKind::Queued));
        }

        let key = last_busy.extend();
        tracing::debug!("All instances of '{}' busy, starting '{}'", base, key.port_for(base));
        Ok(Selection::new(base, key, SelectionKind::Fresh))
    }
}

/// A failed load check counts as busy.
fn is_busy(load: Result<cgirelay_common::Load>, port: &str) -> bool {
    match load {
        Ok(load) => load.is_busy(),
        Err(e) => {
            tracing::debug!("Load check of '{}' failed: {}", port, e);
            true
        }
    }
}
