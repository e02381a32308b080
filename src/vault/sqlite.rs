//! SQLite file store for credential databases
//!
//! A database file holds a `meta` table (format version, root group, Argon2
//! verifier of the key) plus `groups` and `entries`. Opening reads everything
//! into a [`Database`]; saving rewrites all rows inside one transaction.
//!
//! With the default `sqlcipher` feature the key is also handed to SQLCipher,
//! which encrypts the file at rest. Builds without it store plain SQLite and
//! warn on every open.

use crate::vault::model::{Database, Entry, EntryId, Group, GroupId};
use crate::vault::{CompositeKey, VaultError, VaultResult, VaultStore};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use tracing::debug;

/// On-disk format version
const FORMAT_VERSION: &str = "1";

/// File store backed by SQLite
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteStore;

impl SqliteStore {
    /// Create a new SQLite store
    pub fn new() -> Self {
        Self
    }

    fn connect(path: &Path, flags: OpenFlags, key: &CompositeKey) -> VaultResult<Connection> {
        let conn = Connection::open_with_flags(path, flags)?;
        apply_cipher_key(&conn, key)?;
        Ok(conn)
    }
}

#[cfg(feature = "sqlcipher")]
fn apply_cipher_key(conn: &Connection, key: &CompositeKey) -> VaultResult<()> {
    let material = key.material();
    let hex: zeroize::Zeroizing<String> = zeroize::Zeroizing::new(
        material.iter().map(|b| format!("{:02x}", b)).collect(),
    );
    conn.pragma_update(None, "key", hex.as_str())?;
    Ok(())
}

#[cfg(not(feature = "sqlcipher"))]
fn apply_cipher_key(conn: &Connection, _key: &CompositeKey) -> VaultResult<()> {
    tracing::warn!(
        "Built without sqlcipher, {:?} is not encrypted at rest",
        conn.path().unwrap_or_default()
    );
    Ok(())
}

/// Create database tables if they don't exist
fn create_tables(conn: &Connection) -> VaultResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            parent TEXT,
            name TEXT NOT NULL,
            position INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            title TEXT NOT NULL,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            url TEXT NOT NULL,
            notes TEXT NOT NULL,
            modified TEXT NOT NULL,
            position INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> VaultResult<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn hash_key(key: &CompositeKey) -> VaultResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(&key.material(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::Verifier(e.to_string()))
}

fn verify_key(stored: &str, key: &CompositeKey) -> VaultResult<()> {
    let parsed = PasswordHash::new(stored).map_err(|e| VaultError::Corrupt(e.to_string()))?;
    Argon2::default()
        .verify_password(&key.material(), &parsed)
        .map_err(|_| VaultError::Auth)
}

/// Map errors from the first read: a file SQLite cannot parse was either
/// never a database or is encrypted under another key
fn map_first_read(err: rusqlite::Error) -> VaultError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::NotADatabase) => VaultError::Auth,
        _ => VaultError::Sqlite(err),
    }
}

/// Raw group row, converted after the statement is finished
struct GroupRow {
    id: String,
    parent: Option<String>,
    name: String,
}

/// Raw entry row
struct EntryRow {
    id: String,
    group_id: String,
    title: String,
    username: String,
    password: String,
    url: String,
    notes: String,
    modified: String,
}

impl EntryRow {
    fn into_entry(self) -> VaultResult<Entry> {
        let modified = DateTime::parse_from_rfc3339(&self.modified)
            .map_err(|e| VaultError::Corrupt(format!("bad timestamp {}: {}", self.modified, e)))?
            .with_timezone(&Utc);
        let mut entry = Entry::new(GroupId(self.group_id.parse()?));
        entry.id = EntryId(self.id.parse()?);
        entry.title = self.title;
        entry.username = self.username;
        entry.password = self.password;
        entry.url = self.url;
        entry.notes = self.notes;
        entry.modified = modified;
        Ok(entry)
    }
}

impl VaultStore for SqliteStore {
    fn open(&self, path: &Path, key: &CompositeKey) -> VaultResult<Database> {
        if !path.exists() {
            return Err(VaultError::Missing(path.to_path_buf()));
        }
        let conn = Self::connect(path, OpenFlags::SQLITE_OPEN_READ_ONLY, key)?;

        let verifier = conn
            .query_row("SELECT value FROM meta WHERE key = 'verifier'", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(map_first_read)?
            .ok_or_else(|| VaultError::Corrupt("missing key verifier".to_string()))?;
        verify_key(&verifier, key)?;

        match read_meta(&conn, "format")?.as_deref() {
            Some(FORMAT_VERSION) => {}
            other => {
                return Err(VaultError::Corrupt(format!(
                    "unsupported format {:?}",
                    other
                )))
            }
        }
        let root: GroupId = GroupId(
            read_meta(&conn, "root")?
                .ok_or_else(|| VaultError::Corrupt("missing root".to_string()))?
                .parse()?,
        );

        let mut stmt = conn.prepare("SELECT id, parent, name FROM groups ORDER BY position")?;
        let rows = stmt.query_map([], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                parent: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        let mut groups = Vec::new();
        for row in rows {
            let row = row?;
            groups.push(Group {
                id: GroupId(row.id.parse()?),
                parent: match row.parent {
                    Some(p) => Some(GroupId(p.parse()?)),
                    None => None,
                },
                name: row.name,
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT id, group_id, title, username, password, url, notes, modified
            FROM entries
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EntryRow {
                id: row.get(0)?,
                group_id: row.get(1)?,
                title: row.get(2)?,
                username: row.get(3)?,
                password: row.get(4)?,
                url: row.get(5)?,
                notes: row.get(6)?,
                modified: row.get(7)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }

        debug!(
            groups = groups.len(),
            entries = entries.len(),
            "Opened database {:?}",
            path
        );
        Database::from_parts(root, groups, entries)
    }

    fn save(&self, path: &Path, key: &CompositeKey, db: &Database) -> VaultResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| VaultError::Storage {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let mut conn = Self::connect(path, flags, key)?;
        create_tables(&conn).map_err(|e| match e {
            VaultError::Sqlite(inner) => map_first_read(inner),
            other => other,
        })?;

        // Refuse to overwrite a file that belongs to another key
        if let Some(stored) = read_meta(&conn, "verifier")? {
            verify_key(&stored, key)?;
        }
        let verifier = hash_key(key)?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM groups", [])?;
        tx.execute("DELETE FROM entries", [])?;
        for (position, group) in db.group_rows().iter().enumerate() {
            tx.execute(
                "INSERT INTO groups (id, parent, name, position) VALUES (?1, ?2, ?3, ?4)",
                params![
                    group.id.to_string(),
                    group.parent.map(|p| p.to_string()),
                    group.name,
                    position as i64,
                ],
            )?;
        }
        for (position, entry) in db.entry_rows().iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO entries (id, group_id, title, username, password, url, notes, modified, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    entry.id.to_string(),
                    entry.group.to_string(),
                    entry.title,
                    entry.username,
                    entry.password,
                    entry.url,
                    entry.notes,
                    entry.modified.to_rfc3339(),
                    position as i64,
                ],
            )?;
        }
        for (k, v) in [
            ("format", FORMAT_VERSION.to_string()),
            ("root", db.root().to_string()),
            ("verifier", verifier),
        ] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![k, v],
            )?;
        }
        tx.commit()?;

        debug!("Saved database {:?}", path);
        Ok(())
    }
}
