//! Daemon supervisor
//!
//! Starting: pick a fresh credential, raise the wake flag so the first menu
//! shows right away, bind the IPC server, publish the credential and start the
//! worker thread.
//! Serving: wait for the kill flag. ShuttingDown: remove the credential and
//! stop the server.

use crate::config::Config;
use crate::daemon::client;
use crate::daemon::credential::{Credential, CredentialError, CredentialStore};
use crate::daemon::server::{IpcServer, ServerError};
use crate::daemon::signal::{Flag, Signals};
use crate::daemon::timer::CacheTimer;
use crate::daemon::worker::{KillSwitch, MenuWorker};
use crate::menu::MenuTools;
use crate::vault::VaultStore;
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{info, warn};

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("IPC server error: {0}")]
    Server(#[from] ServerError),

    #[error("Failed to start menu worker: {0}")]
    Worker(#[source] io::Error),
}

/// Runs the daemon until it is told to stop
pub struct Supervisor {
    config: Arc<Config>,
    credentials: CredentialStore,
    store: Arc<dyn VaultStore>,
    tools: MenuTools,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        credentials: CredentialStore,
        store: Arc<dyn VaultStore>,
        tools: MenuTools,
    ) -> Self {
        Self {
            config,
            credentials,
            store,
            tools,
        }
    }

    /// Run until a `kill` request, SIGINT or SIGTERM
    pub async fn run(self) -> Result<(), SupervisorError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until a `kill` request or until `stop` completes
    pub async fn run_until(
        self,
        stop: impl Future<Output = ()>,
    ) -> Result<(), SupervisorError> {
        info!("Daemon starting");
        let credential = Credential::generate()?;
        let signals = Arc::new(Signals::starting());

        let server = IpcServer::new(&credential, Arc::clone(&signals))
            .run()
            .await?;
        // Written only once the listener is up; any file left by a dead daemon is overwritten
        self.credentials.write(&credential)?;
        info!(port = credential.port, "Wrote credential file {:?}", self.credentials.path());

        let runtime = Handle::current();
        let kill_switch: KillSwitch = {
            let runtime = runtime.clone();
            let credential = credential.clone();
            Box::new(move || runtime.block_on(client::kill_quietly(&credential)))
        };
        let timer = CacheTimer::new(runtime, self.config.cache_period(), Arc::clone(&signals));
        let worker = MenuWorker::new(
            Arc::clone(&self.config),
            Arc::clone(&signals),
            self.store,
            self.tools,
            timer,
            kill_switch,
        );
        // The worker thread is not joined: it may be stuck in a selector prompt
        worker.spawn().map_err(SupervisorError::Worker)?;

        info!("Daemon serving on {}", server.local_addr());
        let kill_wait = {
            let signals = Arc::clone(&signals);
            tokio::task::spawn_blocking(move || signals.wait(Flag::Kill))
        };
        tokio::select! {
            _ = kill_wait => {
                info!("Kill requested");
            }
            _ = stop => {
                info!("Received shutdown signal");
                signals.set(Flag::Kill);
            }
        }

        info!("Daemon shutting down");
        self.credentials.remove();
        server.shutdown();
        Ok(())
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::protocol::Method;
    use crate::external::{FixedEditor, RecordingTypist};
    use crate::menu::{AutotypeSequence, ScriptedSelector};
    use crate::vault::MemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn supervisor(credentials: CredentialStore, selector: ScriptedSelector) -> Supervisor {
        let tools = MenuTools {
            selector: Arc::new(selector),
            typist: Arc::new(RecordingTypist::new()),
            editor: Arc::new(FixedEditor::default()),
            autotype: AutotypeSequence::parse("{PASSWORD}"),
        };
        Supervisor::new(
            Arc::new(Config::default()),
            credentials,
            Arc::new(MemoryStore::new()),
            tools,
        )
    }

    async fn wait_for_credential(store: &CredentialStore) -> Credential {
        for _ in 0..100 {
            if let Some(credential) = store.load() {
                return credential;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon never wrote its credential");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_kill_removes_credential() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = CredentialStore::with_path(temp_dir.path().join("daemon.cred"));
        let selector = ScriptedSelector::default();

        let daemon = tokio::spawn(
            supervisor(credentials.clone(), selector.clone()).run_until(std::future::pending()),
        );
        let credential = wait_for_credential(&credentials).await;

        client::call(&credential, Method::Kill).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(credentials.load().is_none());
        assert!(!credentials.path().exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_pass_runs_without_wake() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = CredentialStore::with_path(temp_dir.path().join("daemon.cred"));
        let selector = ScriptedSelector::default();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let daemon = tokio::spawn(supervisor(credentials.clone(), selector.clone()).run_until(
            async move {
                let _ = stop_rx.await;
            },
        ));
        wait_for_credential(&credentials).await;

        // No database is configured, so the first pass reports that and idles
        for _ in 0..100 {
            if !selector.prompts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(selector.prompts(), vec!["Error"]);

        stop_tx.send(()).unwrap();
        daemon.await.unwrap().unwrap();
        assert!(!credentials.path().exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_credential_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let credentials = CredentialStore::with_path(temp_dir.path().join("daemon.cred"));
        std::fs::write(credentials.path(), "port=1\nauthkey=staleauthkeystaleauthkey\n").unwrap();

        let daemon = tokio::spawn(
            supervisor(credentials.clone(), ScriptedSelector::default())
                .run_until(std::future::pending()),
        );
        let mut credential = wait_for_credential(&credentials).await;
        for _ in 0..100 {
            if credential.port != 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            credential = wait_for_credential(&credentials).await;
        }
        assert_ne!(credential.port, 1);

        client::call(&credential, Method::Kill).await.unwrap();
        daemon.await.unwrap().unwrap();
    }
}
