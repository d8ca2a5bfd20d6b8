//! # cgirelay CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # CGI entry point: forward the current request to a shop worker
//! cgirelay submit /cgi-bin/shop shop /srv/cgi/shop --loadbalance standard
//!
//! # Fleet administration
//! cgirelay show
//! cgirelay status
//! cgirelay stopscript /srv/cgi/shop
//! ```
//!
//! The runtime directory (sockets and registry) comes from
//! `CGIRELAY_RUNTIME_DIR`/`CGIRELAY_REGISTRY`, or from `--runtime-dir`.

use anyhow::Result;
use argh::FromArgs;
use cgirelay_cli::{init_tracing, render_report};
use cgirelay_client::{ConnectConfig, Connector};
use cgirelay_common::RelayConfig;
use cgirelay_dispatcher::{
    CgiRequest, DispatchConfig, Dispatcher, FleetAdmin, FleetCommand, LoadBalancePolicy, Outcome,
    ProcessSpawner,
};
use cgirelay_registry::Registry;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Connect timeout for admin commands; a registered worker answers at once or not at all.
const FLEET_CONNECT_TIMEOUT_MS: u64 = 500;

#[derive(FromArgs)]
/// cgirelay - persistent CGI worker relay
struct Cli {
    /// directory holding worker sockets and the registry
    #[argh(option, long = "runtime-dir")]
    runtime_dir: Option<String>,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Submit(SubmitArgs),
    Show(ShowArgs),
    Load(LoadArgs),
    Status(StatusArgs),
    Sketch(SketchArgs),
    ShowAll(ShowAllArgs),
    Clean(CleanArgs),
    Stop(StopArgs),
    Kill(KillArgs),
    StopScript(StopScriptArgs),
}

/// Arguments of the CGI entry point.
///
/// The request itself comes from the CGI environment (`REQUEST_METHOD`,
/// `QUERY_STRING`, `CONTENT_LENGTH`, ...) and stdin.
#[derive(FromArgs)]
#[argh(subcommand, name = "submit")]
/// forward the current CGI request to a worker
struct SubmitArgs {
    /// URL of the CGI script, used for the restart link
    #[argh(positional)]
    url: String,

    /// base port name of the worker program
    #[argh(positional)]
    seed: String,

    /// worker program to start when no instance is running
    #[argh(positional)]
    program: String,

    /// idle timeout in milliseconds passed to new workers
    #[argh(option)]
    servertimeout: Option<u64>,

    /// load balancing policy: no, standard or multiple
    #[argh(option)]
    loadbalance: Option<LoadBalancePolicy>,

    /// same as --loadbalance multiple
    #[argh(switch)]
    multipleservers: bool,

    /// how long to keep retrying a worker connection, in milliseconds
    #[argh(option, long = "connect-timeout")]
    connect_timeout: Option<u64>,
}

impl SubmitArgs {
    fn policy(&self) -> LoadBalancePolicy {
        if self.multipleservers {
            LoadBalancePolicy::Multiple
        } else {
            self.loadbalance.unwrap_or_default()
        }
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "show")]
/// list registered workers
struct ShowArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "load")]
/// ask every worker whether it is busy
struct LoadArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// detailed status of every worker
struct StatusArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "sketch")]
/// one-line status of every worker
struct SketchArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "showall")]
/// handlers registered in every worker
struct ShowAllArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "clean")]
/// purge expired state and retire idle workers
struct CleanArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "stop")]
/// stop every worker
struct StopArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "kill")]
/// SIGKILL every worker
struct KillArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "stopscript")]
/// stop the workers of one program
struct StopScriptArgs {
    /// path of the worker program
    #[argh(positional)]
    program: String,
}

impl Commands {
    fn fleet_command(&self) -> Option<FleetCommand> {
        Some(match self {
            Commands::Submit(_) => return None,
            Commands::Show(_) => FleetCommand::Show,
            Commands::Load(_) => FleetCommand::Load,
            Commands::Status(_) => FleetCommand::Status,
            Commands::Sketch(_) => FleetCommand::Sketch,
            Commands::ShowAll(_) => FleetCommand::ShowAll,
            Commands::Clean(_) => FleetCommand::Clean,
            Commands::Stop(_) => FleetCommand::Stop,
            Commands::Kill(_) => FleetCommand::Kill,
            Commands::StopScript(args) => FleetCommand::StopScript(args.program.clone()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // stdout of `submit` is the HTTP response; keep it quiet
    match cli.command {
        Commands::Submit(_) => init_tracing("warn"),
        _ => init_tracing("info"),
    }

    let relay = match &cli.runtime_dir {
        Some(dir) => RelayConfig::with_runtime_dir(dir),
        None => RelayConfig::from_env(),
    };

    if let Commands::Submit(args) = cli.command {
        return run_submit(&relay, args).await;
    }
    match cli.command.fleet_command() {
        Some(command) => run_fleet(&relay, command).await,
        None => Ok(()),
    }
}

async fn run_submit(relay: &RelayConfig, args: SubmitArgs) -> Result<()> {
    let mut connect = ConnectConfig::default();
    if let Some(ms) = args.connect_timeout {
        connect = connect.with_timeout_ms(ms);
    }

    let mut config = DispatchConfig::new(args.url.clone(), args.seed.clone(), args.program.clone());
    config.server_timeout_ms = args.servertimeout;
    config.load_balance.policy = args.policy();

    let dispatcher = Dispatcher::new(
        Connector::from_config(relay, connect),
        Arc::new(Registry::open(relay)),
        Arc::new(ProcessSpawner::for_relay(relay)),
        config,
    );

    let request = CgiRequest::from_process()?;
    let mut stdout = tokio::io::stdout();
    let outcome = dispatcher.dispatch(&request, &mut stdout).await?;
    stdout.flush().await?;

    match outcome {
        Outcome::Forwarded {
            port,
            spawned,
            bytes,
        } => tracing::debug!("{} bytes from '{}' (spawned: {})", bytes, port, spawned),
        Outcome::NoHandler { port } => tracing::warn!("No worker for '{}', sent fallback page", port),
    }
    Ok(())
}

async fn run_fleet(relay: &RelayConfig, command: FleetCommand) -> Result<()> {
    let connector = Connector::from_config(
        relay,
        ConnectConfig::default().with_timeout_ms(FLEET_CONNECT_TIMEOUT_MS),
    );
    let admin = FleetAdmin::new(Arc::new(Registry::open(relay)), connector);

    let report = admin.run(&command).await?;
    print!("{}", render_report(&report));
    Ok(())
}
