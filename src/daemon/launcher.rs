//! The launcher: what plain `keymenu` does
//!
//! Wakes the running daemon when there is one. Otherwise it makes sure a
//! database is configured, running first-run setup if needed, and starts a
//! detached daemon, which shows the menu as soon as it is up.

use crate::config::{expand_home, Config, ConfigError, DatabaseConfig};
use crate::daemon::client;
use crate::daemon::credential::CredentialStore;
use crate::daemon::protocol::Method;
use crate::menu::{show_error, Selector, SelectorError};
use crate::vault::{CompositeKey, VaultError, VaultStore};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Launcher errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Vault(#[from] VaultError),

    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    #[error("Failed to start daemon: {0}")]
    Spawn(String),
}

/// What a launch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A running daemon was asked to show the menu
    Woke,
    /// A new daemon was started
    Spawned,
    /// First-run setup was abandoned
    Cancelled,
}

/// Starts a daemon process
pub trait DaemonSpawner {
    fn spawn(&self) -> Result<(), LaunchError>;
}

/// Re-runs the current executable as `keymenu daemon`, detached
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    /// Extra arguments for the daemon, such as `-v` or `--log-file`
    pub args: Vec<String>,
}

impl DaemonSpawner for ProcessSpawner {
    fn spawn(&self) -> Result<(), LaunchError> {
        use std::process::{Command, Stdio};

        info!("Starting daemon process");
        let exe = std::env::current_exe().map_err(|e| {
            LaunchError::Spawn(format!("Failed to get current executable: {}", e))
        })?;

        let mut command = Command::new(&exe);
        command
            .args(&self.args)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a Ctrl+C in the launching terminal does not reach it
            command.process_group(0);
        }
        command
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("Failed to spawn daemon process: {}", e)))?;

        debug!("Daemon process spawned");
        Ok(())
    }
}

/// Default location offered for a new database
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keymenu")
        .join("passwords.kmdb")
}

/// One launch of the menu
pub struct Launcher<'a> {
    credentials: CredentialStore,
    config: Config,
    config_path: PathBuf,
    selector: &'a dyn Selector,
    store: &'a dyn VaultStore,
    spawner: &'a dyn DaemonSpawner,
}

impl<'a> Launcher<'a> {
    pub fn new(
        credentials: CredentialStore,
        config: Config,
        config_path: PathBuf,
        selector: &'a dyn Selector,
        store: &'a dyn VaultStore,
        spawner: &'a dyn DaemonSpawner,
    ) -> Self {
        Self {
            credentials,
            config,
            config_path,
            selector,
            store,
            spawner,
        }
    }

    /// Wake the daemon, or set up and start one
    pub async fn launch(&mut self) -> Result<LaunchOutcome, LaunchError> {
        if let Some(credential) = self.credentials.load() {
            match client::call(&credential, Method::Wake).await {
                Ok(()) => {
                    info!("Woke running daemon on port {}", credential.port);
                    return Ok(LaunchOutcome::Woke);
                }
                Err(e) if e.is_connection() => {
                    debug!("Credential file is stale, nothing listening: {}", e);
                }
                // Whatever answers on a reused port is not our daemon; the new
                // one overwrites the credential file once it has bound
                Err(e) => {
                    debug!(
                        "Credential file is stale, port {} did not answer as a daemon: {}",
                        credential.port, e
                    );
                }
            }
        }

        if !self.config.has_database() && !self.first_run()? {
            info!("First-run setup cancelled");
            return Ok(LaunchOutcome::Cancelled);
        }

        self.spawner.spawn()?;
        Ok(LaunchOutcome::Spawned)
    }

    /// The configuration, including anything first-run setup added
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ask for a database path, create the file if needed and save the config
    ///
    /// Returns `false` when the user backs out.
    fn first_run(&mut self) -> Result<bool, LaunchError> {
        info!("No database configured, running first-run setup");
        let suggestion = default_database_path().display().to_string();
        let answer = self.selector.select("Database path", &[suggestion], false)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(false);
        }
        let path = expand_home(Path::new(answer));

        if !self.store.exists(&path) {
            let first = self.selector.select("New passphrase", &[], true)?;
            if first.is_empty() {
                return Ok(false);
            }
            let second = self.selector.select("Verify passphrase", &[], true)?;
            if first != second {
                show_error(self.selector, "Passphrases do not match");
                return Ok(false);
            }
            self.store
                .create(&path, &CompositeKey::from_passphrase(first))?;
            info!("Created database {:?}", path);
        }

        self.config.databases.push(DatabaseConfig {
            path,
            keyfile: None,
            password: None,
        });
        self.config.save_to(&self.config_path)?;
        info!("Saved config to {:?}", self.config_path);
        Ok(true)
    }
}
