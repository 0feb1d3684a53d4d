use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shared_ledger::bank::{self, Bank, BankError};
use shared_ledger::config::Config;
use shared_ledger::csv::{default_seed, read_seed, write_accounts};
use shared_ledger::server::{Limits, Server};
use shared_ledger::storage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.txt";

/// Shared-account bank with write-back persistence and fraud alerts
#[derive(Parser, Debug)]
#[command(name = "shared-ledger", version)]
struct Cli {
    /// Settings file (KEY=VALUE lines). Defaults to ./config.txt when present.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve client sessions over TCP until Ctrl-C
    Serve {
        /// Override LISTEN_ADDR
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Create the account file
    Init {
        /// CSV seed with an id,holder,balance,blocked header
        #[arg(long, value_name = "CSV")]
        seed: Option<PathBuf>,
        /// Replace an existing account file
        #[arg(long)]
        force: bool,
    },
    /// Print the account file as CSV
    Dump,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BankError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Init { seed, force } => {
            let accounts = match seed {
                Some(path) => read_seed(&path)?
                    .filter_map(|row| row.map_err(|e| warn!("{e}")).ok())
                    .collect(),
                None => default_seed(),
            };
            let count = bank::init_accounts(&config.accounts_path, accounts, force)?;
            info!(accounts = count, path = %config.accounts_path.display(), "account file created");
            Ok(())
        }
        Command::Dump => {
            let accounts = storage::load_accounts(&config.accounts_path)?;
            write_accounts(std::io::stdout().lock(), &accounts)?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, BankError> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(Config::load(DEFAULT_CONFIG)?),
        None => {
            info!("no {DEFAULT_CONFIG} found, using defaults");
            Ok(Config::default())
        }
    }
}

async fn serve(config: Config, listen: Option<String>) -> Result<(), BankError> {
    let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
    let limits = Limits::from(&config);
    let session_count = config.session_count;

    let bank = Bank::start(config)?;
    let server = match Server::bind(&addr, bank.sessions(), limits, session_count).await {
        Ok(server) => server,
        Err(source) => {
            bank.shutdown().await;
            return Err(BankError::Listen { addr, source });
        }
    };

    let cancel = CancellationToken::new();
    let server = tokio::spawn(server.run(cancel.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, shutting down");
    }
    info!("shutting down");

    cancel.cancel();
    if let Err(e) = server.await {
        warn!(error = %e, "server task ended abnormally");
    }
    bank.shutdown().await;
    Ok(())
}
