//! In-memory store for tests.
//!
//! Keeps saved databases in a map keyed by path, checks passphrases like a
//! real store would, and counts opens and saves so tests can assert on reload
//! and persist behaviour without touching the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::model::Database;
use super::{CompositeKey, VaultError, VaultResult, VaultStore};

struct Stored {
    material: Vec<u8>,
    db: Database,
}

#[derive(Default)]
struct Inner {
    files: Mutex<HashMap<PathBuf, Stored>>,
    opens: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: std::sync::atomic::AtomicBool,
}

/// Mock vault store.
///
/// Clones share state, so a test can keep one handle while the worker owns
/// another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one database under `path`.
    pub fn with_database(path: impl Into<PathBuf>, passphrase: &str, db: Database) -> Self {
        let store = Self::new();
        store.insert(path, passphrase, db);
        store
    }

    /// Put a database in place as if another program had written it.
    pub fn insert(&self, path: impl Into<PathBuf>, passphrase: &str, db: Database) {
        let material = CompositeKey::from_passphrase(passphrase).material().to_vec();
        self.files()
            .insert(path.into(), Stored { material, db });
    }

    /// Current saved contents of `path`.
    pub fn snapshot(&self, path: &Path) -> Option<Database> {
        self.files().get(path).map(|s| s.db.clone())
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Make every following save fail with a storage error.
    pub fn fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Stored>> {
        self.inner
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl VaultStore for MemoryStore {
    fn open(&self, path: &Path, key: &CompositeKey) -> VaultResult<Database> {
        let files = self.files();
        let stored = files
            .get(path)
            .ok_or_else(|| VaultError::Missing(path.to_path_buf()))?;
        if stored.material != key.material().as_slice() {
            return Err(VaultError::Auth);
        }
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(stored.db.clone())
    }

    fn save(&self, path: &Path, key: &CompositeKey, db: &Database) -> VaultResult<()> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(VaultError::Storage {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.files().insert(
            path.to_path_buf(),
            Stored {
                material: key.material().to_vec(),
                db: db.clone(),
            },
        );
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_checks_passphrase() {
        let store = MemoryStore::with_database("/db", "pw", Database::new("Root"));
        assert!(store
            .open(Path::new("/db"), &CompositeKey::from_passphrase("pw"))
            .is_ok());
        assert!(matches!(
            store.open(Path::new("/db"), &CompositeKey::from_passphrase("nope")),
            Err(VaultError::Auth)
        ));
        assert_eq!(store.open_count(), 1);
    }

    #[test]
    fn test_open_missing() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.open(Path::new("/db"), &CompositeKey::from_passphrase("pw")),
            Err(VaultError::Missing(_))
        ));
    }

    #[test]
    fn test_save_counts_and_snapshots() {
        let store = MemoryStore::new();
        let key = CompositeKey::from_passphrase("pw");
        let db = Database::new("Root");
        store.save(Path::new("/db"), &key, &db).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot(Path::new("/db")), Some(db));
        assert!(store.exists(Path::new("/db")));
    }

    #[test]
    fn test_fail_saves() {
        let store = MemoryStore::new();
        store.fail_saves(true);
        let result = store.save(
            Path::new("/db"),
            &CompositeKey::from_passphrase("pw"),
            &Database::new("Root"),
        );
        assert!(matches!(result, Err(VaultError::Storage { .. })));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.insert("/db", "pw", Database::new("Root"));
        assert!(store.exists(Path::new("/db")));
    }
}
