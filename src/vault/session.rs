//! The menu worker's single open database
//!
//! A session is never patched after an external change: reloading builds a
//! whole new session from disk and the old one is dropped.

use crate::vault::model::Database;
use crate::vault::{CompositeKey, VaultResult, VaultStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Open database plus what is needed to save or reopen it
pub struct DatabaseSession {
    path: PathBuf,
    keyfile: Option<PathBuf>,
    key: CompositeKey,
    db: Database,
    store: Arc<dyn VaultStore>,
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("path", &self.path)
            .field("keyfile", &self.keyfile)
            .finish_non_exhaustive()
    }
}

impl DatabaseSession {
    /// Open `path` with `key`
    pub fn open(
        store: Arc<dyn VaultStore>,
        path: &Path,
        keyfile: Option<&Path>,
        key: CompositeKey,
    ) -> VaultResult<Self> {
        let db = store.open(path, &key)?;
        info!("Opened database {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            keyfile: keyfile.map(Path::to_path_buf),
            key,
            db,
            store,
        })
    }

    /// Build a fresh session from what is on disk now, reusing the key
    pub fn reopen(&self) -> VaultResult<Self> {
        Self::open(
            Arc::clone(&self.store),
            &self.path,
            self.keyfile.as_deref(),
            self.key.clone(),
        )
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only view of the database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Apply a mutation and persist it
    ///
    /// The mutation runs on a copy; the session only adopts it once the save
    /// succeeded, so memory never holds changes the file does not.
    pub fn commit<T>(
        &mut self,
        mutation: impl FnOnce(&mut Database) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let mut next = self.db.clone();
        let output = mutation(&mut next)?;
        self.store.save(&self.path, &self.key, &next)?;
        self.db = next;
        Ok(output)
    }
}
