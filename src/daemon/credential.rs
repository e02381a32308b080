//! Port and shared secret that authenticate the local IPC channel
//!
//! Both the launcher and the daemon read the same small file, so no discovery
//! protocol is needed:
//!
//! ```text
//! port=41234
//! authkey=qzkfhwpexmbtlrjd...
//! ```

use rand::rngs::OsRng;
use rand::Rng;
use std::fs;
use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Length of generated secrets
pub const SECRET_LEN: usize = 24;

/// Shortest secret accepted when reading the file
pub const MIN_SECRET_LEN: usize = 15;

/// Credential file errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to write credential file {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No free loopback port: {0}")]
    NoPort(io::Error),
}

/// Port and secret of a running daemon
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub port: u16,
    pub secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("port", &self.port)
            .field("secret", &"********")
            .finish()
    }
}

impl Credential {
    /// Fresh credential on a free ephemeral loopback port
    pub fn generate() -> Result<Self, CredentialError> {
        Ok(Self {
            port: free_loopback_port().map_err(CredentialError::NoPort)?,
            secret: generate_secret(SECRET_LEN),
        })
    }

    /// Parse the `key=value` file format; `None` on anything unexpected
    pub fn parse(contents: &str) -> Option<Self> {
        let mut port = None;
        let mut secret = None;
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "port" => port = value.trim().parse::<u16>().ok(),
                "authkey" => secret = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let port = port.filter(|p| *p != 0)?;
        let secret = secret.filter(|s| s.len() >= MIN_SECRET_LEN)?;
        Some(Self { port, secret })
    }

    /// Render the file format
    pub fn to_file_contents(&self) -> String {
        format!("port={}\nauthkey={}\n", self.port, self.secret)
    }
}

/// Reads and writes the credential file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at the default location
    pub fn new() -> Self {
        Self::with_path(default_credential_path())
    }

    /// Store at a custom location
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the credential file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; missing or unparsable content means no daemon
    pub fn load(&self) -> Option<Credential> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let credential = Credential::parse(&contents);
        if credential.is_none() {
            warn!("Ignoring unreadable credential file {:?}", self.path);
        }
        credential
    }

    /// Generate and persist a fresh credential, overwriting any stale file
    pub fn create(&self) -> Result<Credential, CredentialError> {
        let credential = Credential::generate()?;
        self.write(&credential)?;
        info!(port = credential.port, "Wrote credential file {:?}", self.path);
        Ok(credential)
    }

    /// Return the persisted credential, creating one if there is none
    pub fn load_or_create(&self) -> Result<Credential, CredentialError> {
        match self.load() {
            Some(credential) => Ok(credential),
            None => self.create(),
        }
    }

    /// Persist a given credential
    pub fn write(&self, credential: &Credential) -> Result<(), CredentialError> {
        let storage = |source| CredentialError::Storage {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        write_private(&self.path, credential.to_file_contents().as_bytes()).map_err(storage)
    }

    /// Delete the file; a missing file is not an error
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed credential file {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove credential file: {}", e),
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

/// Ask the OS for an unused loopback port
pub fn free_loopback_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Random lowercase ASCII string from the OS RNG
pub fn generate_secret(len: usize) -> String {
    let mut rng = OsRng;
    (0..len.max(MIN_SECRET_LEN))
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Default credential path: `<cache_dir>/keymenu/daemon.cred`
pub fn default_credential_path() -> PathBuf {
    super::default_runtime_dir().join("daemon.cred")
}
