//! Daemon module for the persistent menu service
//!
//! The daemon runs as a separate process holding one open database. A short
//! lived launcher finds it through the credential file and wakes it over an
//! authenticated loopback connection; the daemon then shows the menu.
//!
//! Inside the daemon, the supervisor hosts the IPC server on a tokio runtime
//! while the menu worker runs on its own thread. They share nothing but the
//! [`Signals`](signal::Signals) hub.

pub mod client;
pub mod credential;
pub mod launcher;
pub mod protocol;
pub mod server;
pub mod signal;
pub mod supervisor;
pub mod timer;
pub mod worker;

use std::path::PathBuf;

/// Application name for the runtime directory
const APP_NAME: &str = "keymenu";

/// Directory for the credential file and the daemon log
pub fn default_runtime_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}
