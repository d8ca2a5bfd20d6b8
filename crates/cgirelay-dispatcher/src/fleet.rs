//! Batch administration of all registered workers.
//!
//! Every command reads the live registry, talks to each entry concurrently
//! and, where the command changes the fleet, reconciles the registry
//! afterwards. A failure talking to one worker is recorded in that worker's
//! entry and never aborts the batch.

use cgirelay_client::Connector;
use cgirelay_common::{Load, Result, WorkerMessage};
use cgirelay_registry::{OsProcessTable, ProcessTable, Registry, WorkerRecord};
use std::sync::Arc;

/// A fleet administration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCommand {
    /// List the live registry
    Show,
    /// `GetLoad` to every worker
    Load,
    /// `ShowStatus` to every worker
    Status,
    /// `SketchStatus` to every worker
    Sketch,
    /// `SketchHandlers` to every worker
    ShowAll,
    /// `CleanServer` to every worker, then reconcile
    Clean,
    /// `StopCgiServer` to every worker, then reconcile
    Stop,
    /// `SIGKILL` every worker, remove the entries, then reconcile
    Kill,
    /// `Stop` restricted to one program
    StopScript(String),
}

impl FleetCommand {
    pub fn name(&self) -> &'static str {
        match self {
            FleetCommand::Show => "show",
            FleetCommand::Load => "load",
            FleetCommand::Status => "status",
            FleetCommand::Sketch => "sketch",
            FleetCommand::ShowAll => "showall",
            FleetCommand::Clean => "clean",
            FleetCommand::Stop => "stop",
            FleetCommand::Kill => "kill",
            FleetCommand::StopScript(_) => "stopscript",
        }
    }

    /// Protocol message sent to each worker, if any.
    fn message(&self) -> Option<WorkerMessage> {
        match self {
            FleetCommand::Show | FleetCommand::Kill => None,
            FleetCommand::Load => Some(WorkerMessage::GetLoad),
            FleetCommand::Status => Some(WorkerMessage::ShowStatus),
            FleetCommand::Sketch => Some(WorkerMessage::SketchStatus),
            FleetCommand::ShowAll => Some(WorkerMessage::SketchHandlers),
            FleetCommand::Clean => Some(WorkerMessage::CleanServer),
            FleetCommand::Stop | FleetCommand::StopScript(_) => Some(WorkerMessage::StopCgiServer),
        }
    }

    fn reconciles(&self) -> bool {
        matches!(
            self,
            FleetCommand::Clean | FleetCommand::Stop | FleetCommand::Kill | FleetCommand::StopScript(_)
        )
    }
}

/// What happened to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Listed only
    Listed,
    /// Answer to `GetLoad`
    Load(Load),
    /// Framed document returned by the worker
    Document(Vec<u8>),
    /// Message delivered, nothing to read back
    Sent,
    /// Process killed and entry removed
    Killed,
    /// Could not reach or handle the worker
    Failed(String),
}

impl EntryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EntryOutcome::Failed(_))
    }
}

/// One worker's line in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetEntry {
    pub record: WorkerRecord,
    pub outcome: EntryOutcome,
}

/// Result of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport {
    pub command: &'static str,
    pub entries: Vec<FleetEntry>,
    /// Live registry after reconciliation (commands that change the fleet only)
    pub remaining: Option<Vec<WorkerRecord>>,
}

/// Runs fleet commands.
pub struct FleetAdmin<P: ProcessTable = OsProcessTable> {
    registry: Arc<Registry<P>>,
    connector: Connector,
}

impl<P: ProcessTable + 'static> FleetAdmin<P> {
    pub fn new(registry: Arc<Registry<P>>, connector: Connector) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Runs `command` against every live worker it applies to.
    pub async fn run(&self, command: &FleetCommand) -> Result<FleetReport> {
        let mut records = Registry::run_blocking(&self.registry, |registry| registry.read_live()).await?;
        if let FleetCommand::StopScript(program) = command {
            records.retain(|r| r.runs_program(program));
        }
        tracing::info!("{}: {} worker(s)", command.name(), records.len());

        let entries = match (command, command.message()) {
            (FleetCommand::Kill, _) => self.kill_all(records).await?,
            (_, Some(message)) => self.send_all(records, &message).await,
            (_, None) => records
                .into_iter()
                .map(|record| FleetEntry {
                    record,
                    outcome: EntryOutcome::Listed,
                })
                .collect(),
        };

        let remaining = if command.reconciles() {
            Some(self.reconcile(command, &entries).await?)
        } else {
            None
        };

        Ok(FleetReport {
            command: command.name(),
            entries,
            remaining,
        })
    }

    /// Sends `message` to every record concurrently.
    async fn send_all(&self, records: Vec<WorkerRecord>, message: &WorkerMessage) -> Vec<FleetEntry> {
        let sends: Vec<_> = records
            .into_iter()
            .map(|record| {
                let connector = &self.connector;
                async move {
                    let outcome = Self::send_one(connector, &record.port, message).await;
                    if let EntryOutcome::Failed(reason) = &outcome {
                        tracing::warn!("{} on '{}' failed: {}", message.name(), record.port, reason);
                    }
                    FleetEntry { record, outcome }
                }
            })
            .collect();

        futures::future::join_all(sends).await
    }

    async fn send_one(connector: &Connector, port: &str, message: &WorkerMessage) -> EntryOutcome {
        let Some(mut conn) = connector.connect(port).await else {
            return EntryOutcome::Failed("not answering".to_string());
        };

        let result = match message {
            WorkerMessage::GetLoad => conn.get_load().await.map(EntryOutcome::Load),
            WorkerMessage::StopCgiServer => conn.stop().await.map(|_| EntryOutcome::Sent),
            other => match conn.send(other).await {
                Ok(()) => conn.read_document().await.map(EntryOutcome::Document),
                Err(e) => Err(e),
            },
        };

        result.unwrap_or_else(|e| EntryOutcome::Failed(e.to_string()))
    }

    async fn kill_all(&self, records: Vec<WorkerRecord>) -> Result<Vec<FleetEntry>> {
        Registry::run_blocking(&self.registry, move |registry| {
            Ok(records
                .into_iter()
                .map(|record| {
                    let outcome = match registry.processes().terminate(record.pid) {
                        Ok(()) => match registry.remove(record.pid, &record.port) {
                            Ok(_) => EntryOutcome::Killed,
                            Err(e) => EntryOutcome::Failed(e.to_string()),
                        },
                        Err(e) => EntryOutcome::Failed(e.to_string()),
                    };
                    FleetEntry { record, outcome }
                })
                .collect())
        })
        .await
    }

    /// Drops entries of stopped workers, then prunes dead pids.
    async fn reconcile(&self, command: &FleetCommand, entries: &[FleetEntry]) -> Result<Vec<WorkerRecord>> {
        let stopped: Vec<(u32, String)> = if matches!(command, FleetCommand::Stop | FleetCommand::StopScript(_)) {
            entries
                .iter()
                .filter(|e| e.outcome == EntryOutcome::Sent)
                .map(|e| (e.record.pid, e.record.port.clone()))
                .collect()
        } else {
            Vec::new()
        };

        Registry::run_blocking(&self.registry, move |registry| {
            for (pid, port) in &stopped {
                registry.remove(*pid, port)?;
            }
            registry.read_live()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_messages() {
        assert_eq!(FleetCommand::Show.message(), None);
        assert_eq!(FleetCommand::Kill.message(), None);
        assert_eq!(FleetCommand::Load.message(), Some(WorkerMessage::GetLoad));
        assert_eq!(FleetCommand::Sketch.message(), Some(WorkerMessage::SketchStatus));
        assert_eq!(FleetCommand::ShowAll.message(), Some(WorkerMessage::SketchHandlers));
        assert_eq!(
            FleetCommand::StopScript("/p".to_string()).message(),
            Some(WorkerMessage::StopCgiServer)
        );
    }

    #[test]
    fn test_only_mutating_commands_reconcile() {
        assert!(!FleetCommand::Show.reconciles());
        assert!(!FleetCommand::Status.reconciles());
        assert!(FleetCommand::Clean.reconciles());
        assert!(FleetCommand::Kill.reconciles());
        assert!(FleetCommand::StopScript("/p".to_string()).reconciles());
    }
}
