use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use keymenu::config::Config;
use keymenu::daemon::client;
use keymenu::daemon::credential::CredentialStore;
use keymenu::daemon::launcher::{LaunchOutcome, Launcher, ProcessSpawner};
use keymenu::daemon::protocol::Method;
use keymenu::daemon::supervisor::Supervisor;
use keymenu::logging::{init_daemon_logging, init_logging, LogConfig, Verbosity};
use keymenu::menu::password::{gen_passwd, DEFAULT_LENGTH};
use keymenu::menu::{CommandSelector, MenuTools};
use keymenu::vault::SqliteStore;

#[derive(Parser)]
#[command(name = "keymenu")]
#[command(version)]
#[command(about = "Use a credential database from dmenu or rofi")]
#[command(
    long_about = "Keeps a credential database open in a background daemon and drives it through dmenu, rofi or another selector. Run without a subcommand to show the menu."
)]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to this file (the daemon always logs to a file)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground (started automatically by the launcher)
    Daemon,
    /// Stop a running daemon
    Stop,
    /// Make a running daemon reopen its database on the next menu
    Expire,
    /// Print a random password
    Generate {
        /// Password length (minimum 4)
        #[arg(short, long, default_value_t = DEFAULT_LENGTH)]
        length: usize,

        /// Include digits
        #[arg(short, long)]
        digits: bool,

        /// Include punctuation
        #[arg(short, long)]
        special: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_occurrences(cli.verbose);

    match cli.command {
        None => {
            let _guard = init_logging(&LogConfig {
                verbosity,
                log_file: cli.log_file.clone(),
            });
            launch(cli.verbose, cli.log_file).await
        }
        Some(Commands::Daemon) => {
            let _guard = init_daemon_logging(cli.log_file.as_deref(), verbosity);
            run_daemon().await
        }
        Some(Commands::Stop) => {
            let _guard = init_logging(&LogConfig {
                verbosity,
                log_file: cli.log_file,
            });
            if client::call_running(&CredentialStore::new(), Method::Kill)
                .await
                .context("Failed to stop daemon")?
            {
                println!("Daemon stopped");
            } else {
                println!("Daemon is not running");
            }
            Ok(())
        }
        Some(Commands::Expire) => {
            let _guard = init_logging(&LogConfig {
                verbosity,
                log_file: cli.log_file,
            });
            if client::call_running(&CredentialStore::new(), Method::ExpireCache)
                .await
                .context("Failed to expire daemon cache")?
            {
                println!("Database cache expired");
            } else {
                println!("Daemon is not running");
            }
            Ok(())
        }
        Some(Commands::Generate {
            length,
            digits,
            special,
        }) => {
            println!("{}", gen_passwd(length, digits, special));
            Ok(())
        }
    }
}

/// Wake the daemon, or set up and start one
async fn launch(verbose: u8, log_file: Option<PathBuf>) -> Result<()> {
    let config_path = Config::config_path()?;
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let mut daemon_args = Vec::new();
    if verbose > 0 {
        daemon_args.push(format!("-{}", "v".repeat(verbose as usize)));
    }
    if let Some(path) = log_file {
        daemon_args.push("--log-file".to_string());
        daemon_args.push(path.display().to_string());
    }

    let selector = CommandSelector::new(&config.selector);
    let store = SqliteStore;
    let spawner = ProcessSpawner { args: daemon_args };
    let mut launcher = Launcher::new(
        CredentialStore::new(),
        config,
        config_path,
        &selector,
        &store,
        &spawner,
    );

    match launcher.launch().await? {
        LaunchOutcome::Woke => info!("Menu shown by running daemon"),
        LaunchOutcome::Spawned => info!("Started daemon"),
        LaunchOutcome::Cancelled => info!("Setup cancelled"),
    }
    Ok(())
}

/// Run the supervisor until killed
async fn run_daemon() -> Result<()> {
    let config = Arc::new(Config::load().context("Failed to load config")?);
    let tools = MenuTools::from_config(&config);
    let supervisor = Supervisor::new(
        Arc::clone(&config),
        CredentialStore::new(),
        Arc::new(SqliteStore),
        tools,
    );

    info!("keymenu daemon {} starting", env!("CARGO_PKG_VERSION"));
    supervisor.run().await.context("Daemon failed")?;
    info!("keymenu daemon exited");
    Ok(())
}
