//! Credential database access
//!
//! The menu worker talks to the database through [`VaultStore`], which opens a
//! file into an in-memory [`Database`] and writes it back. The shipped store is
//! a SQLite file ([`SqliteStore`]); [`MemoryStore`] keeps everything in memory
//! for tests.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

pub mod memory;
pub mod model;
pub mod session;
pub mod sqlite;

pub use memory::MemoryStore;
pub use model::{Database, Entry, EntryId, Field, Group, GroupId};
pub use session::DatabaseSession;
pub use sqlite::SqliteStore;

/// Database error types
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Wrong passphrase or keyfile")]
    Auth,

    #[error("Database file not found: {0}")]
    Missing(PathBuf),

    #[error("Database storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read keyfile {path}: {source}")]
    Keyfile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Corrupt database: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Passphrase verifier error: {0}")]
    Verifier(String),
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Passphrase plus optional keyfile contents
///
/// Both halves are wiped from memory when the key is dropped.
#[derive(Clone)]
pub struct CompositeKey {
    passphrase: Zeroizing<String>,
    keyfile: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKey")
            .field("keyfile", &self.keyfile.is_some())
            .finish_non_exhaustive()
    }
}

impl CompositeKey {
    /// Key from a passphrase alone
    pub fn from_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
            keyfile: None,
        }
    }

    /// Key from a passphrase and, if given, the contents of a keyfile
    pub fn new(passphrase: impl Into<String>, keyfile: Option<&Path>) -> VaultResult<Self> {
        let keyfile = match keyfile {
            Some(path) => Some(Zeroizing::new(std::fs::read(path).map_err(|source| {
                VaultError::Keyfile {
                    path: path.to_path_buf(),
                    source,
                }
            })?)),
            None => None,
        };
        Ok(Self {
            passphrase: Zeroizing::new(passphrase.into()),
            keyfile,
        })
    }

    /// Bytes fed to the verifier: passphrase, a NUL separator, keyfile bytes
    pub fn material(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(self.passphrase.as_bytes().to_vec());
        if let Some(ref keyfile) = self.keyfile {
            bytes.push(0);
            bytes.extend_from_slice(keyfile);
        }
        bytes
    }
}

/// Opens and saves credential databases
pub trait VaultStore: Send + Sync {
    /// Read the database at `path`, failing with [`VaultError::Auth`] on a bad key
    fn open(&self, path: &Path, key: &CompositeKey) -> VaultResult<Database>;

    /// Write `db` back to `path`, replacing its previous contents
    fn save(&self, path: &Path, key: &CompositeKey, db: &Database) -> VaultResult<()>;

    /// Whether a database exists at `path`
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Create a new, empty database at `path`
    fn create(&self, path: &Path, key: &CompositeKey) -> VaultResult<Database> {
        let db = Database::new("Root");
        self.save(path, key, &db)?;
        Ok(db)
    }
}
