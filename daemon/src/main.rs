//! Onyx service-node daemon — wires the subsystem to its collaborators
//! and exposes the operator commands.
//!
//! The chain, transport, and wallet backends live in the main daemon
//! binary; this entry point drives the subsystem against whichever
//! implementations the build links in. The stand-ins used here are the
//! deterministic in-memory backends, which keeps the subsystem runnable
//! (and the operator commands testable) without the full node.

use clap::Parser;
use onyx_chain::MemoryChain;
use onyx_net::NullTransport;
use onyx_node::commands;
use onyx_node::logging::{init_logging, LogFormat};
use onyx_node::{NodeConfig, NullWallet, Subsystem};
use onyx_types::{unix_now, NetworkId};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "onyx-daemon", about = "Onyx service-node daemon")]
struct Cli {
    /// Network to connect to: "main", "testnet", or "regtest".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "ONYX_NETWORK")]
    network: Option<String>,

    /// Data directory for registry and payment caches.
    #[arg(long, env = "ONYX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Port for P2P connections (defaults to the network default).
    #[arg(long, env = "ONYX_P2P_PORT")]
    port: Option<u16>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "ONYX_LOG_LEVEL")]
    log_level: String,

    /// Log format: "human" or "json".
    #[arg(long, default_value = "human", env = "ONYX_LOG_FORMAT")]
    log_format: String,

    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the subsystem tick loop.
    Run,
    /// Broadcast an announce for one configured alias.
    StartAlias { alias: String },
    /// Broadcast announces for every configured alias.
    StartAll,
    /// Broadcast announces for aliases that are not currently running.
    StartMissing,
    /// Print every registered service node.
    List,
    /// Print the registered service node count.
    Count,
    /// Print the local node's activation status.
    Status,
}

fn parse_network(s: &str) -> NetworkId {
    match s.to_lowercase().as_str() {
        "main" => NetworkId::Main,
        "testnet" => NetworkId::Testnet,
        _ => NetworkId::Regtest,
    }
}

fn load_config(cli: &Cli) -> NodeConfig {
    let mut config = match &cli.config {
        Some(path) => match NodeConfig::from_toml_file(&path.display().to_string()) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read config file; using defaults");
                NodeConfig::default()
            }
        },
        None => NodeConfig::default(),
    };

    if let Some(network) = cli.network.as_deref().map(parse_network) {
        config.network = network;
        config.port = network.default_port();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.log_level = cli.log_level.clone();
    config.log_format = cli.log_format.clone();
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogFormat::from_str(&cli.log_format), &cli.log_level);

    let config = load_config(&cli);
    let subsystem = match Subsystem::new(config) {
        Ok(subsystem) => subsystem,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise the service-node subsystem");
            return ExitCode::FAILURE;
        }
    };

    // Collaborator backends. The full daemon passes its chain index,
    // connection manager, and wallet here.
    let chain = MemoryChain::new();
    let mut transport = NullTransport::new();
    let mut wallet = NullWallet::new();

    match cli.command {
        Command::Run => {
            tracing::info!(
                network = subsystem.config.network.as_str(),
                port = subsystem.config.port,
                "starting service-node subsystem"
            );
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        subsystem.tick(&chain, &mut transport, &mut wallet, unix_now());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                }
            }
            if let Err(e) = subsystem.save_caches() {
                tracing::warn!(error = %e, "failed to persist caches");
            }
            tracing::info!("onyx daemon exited cleanly");
            ExitCode::SUCCESS
        }
        Command::StartAlias { alias } => {
            match commands::start_alias(
                &subsystem,
                &chain,
                &mut transport,
                &mut wallet,
                &alias,
                unix_now(),
            ) {
                Ok(result) => report_start_results(&[result]),
                Err(e) => command_failure(e),
            }
        }
        Command::StartAll => {
            match commands::start_all(&subsystem, &chain, &mut transport, &mut wallet, unix_now())
            {
                Ok(results) => report_start_results(&results),
                Err(e) => command_failure(e),
            }
        }
        Command::StartMissing => {
            match commands::start_missing(
                &subsystem,
                &chain,
                &mut transport,
                &mut wallet,
                unix_now(),
            ) {
                Ok(results) => report_start_results(&results),
                Err(e) => command_failure(e),
            }
        }
        Command::List => {
            for line in commands::list(&subsystem) {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Command::Count => {
            println!("{}", commands::count(&subsystem));
            ExitCode::SUCCESS
        }
        Command::Status => {
            println!("{}", commands::status(&subsystem));
            ExitCode::SUCCESS
        }
    }
}

fn report_start_results(results: &[commands::StartResult]) -> ExitCode {
    for result in results {
        match &result.error {
            None => println!("{}: started", result.alias),
            Some(error) => println!("{}: failed ({error})", result.alias),
        }
    }
    ExitCode::SUCCESS
}

fn command_failure(error: commands::CommandError) -> ExitCode {
    eprintln!("{error}");
    ExitCode::from(error.exit_code() as u8)
}
