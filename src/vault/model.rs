//! In-memory credential database
//!
//! The whole database is loaded into memory when a session opens. Mutations
//! happen here and are written back in one piece by the store's `save`.

use crate::vault::{VaultError, VaultResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// Identity of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

/// Identity of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl GroupId {
    /// Generate a new random group ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryId {
    /// Generate a new random entry ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of the group tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    /// `None` only for the root
    pub parent: Option<GroupId>,
    pub name: String,
}

/// Editable text fields of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Username,
    Password,
    Url,
    Notes,
}

impl Field {
    /// Label shown in menus
    pub fn label(&self) -> &'static str {
        match self {
            Field::Title => "Title",
            Field::Username => "Username",
            Field::Password => "Password",
            Field::Url => "URL",
            Field::Notes => "Notes",
        }
    }
}

/// A credential record
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub group: GroupId,
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
    pub modified: DateTime<Utc>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"**********")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.password.zeroize();
        self.notes.zeroize();
    }
}

impl Entry {
    /// Empty entry in `group`
    pub fn new(group: GroupId) -> Self {
        Self {
            id: EntryId::new(),
            group,
            title: String::new(),
            username: String::new(),
            password: String::new(),
            url: String::new(),
            notes: String::new(),
            modified: Utc::now(),
        }
    }

    /// Read a field
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Title => &self.title,
            Field::Username => &self.username,
            Field::Password => &self.password,
            Field::Url => &self.url,
            Field::Notes => &self.notes,
        }
    }

    /// Overwrite a field and bump the modification time
    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Username => &mut self.username,
            Field::Password => &mut self.password,
            Field::Url => &mut self.url,
            Field::Notes => &mut self.notes,
        };
        slot.zeroize();
        *slot = value;
        self.modified = Utc::now();
    }
}

/// The open database: a group tree plus a flat list of entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    root: GroupId,
    groups: Vec<Group>,
    entries: Vec<Entry>,
}

impl Database {
    /// Empty database with a single root group
    pub fn new(root_name: &str) -> Self {
        let root = GroupId::new();
        Self {
            root,
            groups: vec![Group {
                id: root,
                parent: None,
                name: root_name.to_string(),
            }],
            entries: Vec::new(),
        }
    }

    /// Rebuild a database from stored rows, checking the tree is sound
    pub fn from_parts(root: GroupId, groups: Vec<Group>, entries: Vec<Entry>) -> VaultResult<Self> {
        let db = Self {
            root,
            groups,
            entries,
        };

        match db.group(root) {
            Some(group) if group.parent.is_none() => {}
            _ => return Err(VaultError::Corrupt("root group missing".to_string())),
        }
        for group in &db.groups {
            if group.id != root && group.parent.and_then(|p| db.group(p)).is_none() {
                return Err(VaultError::Corrupt(format!(
                    "group {} has no parent",
                    group.name
                )));
            }
        }
        // Every group must be reachable from the root, which also rules out cycles
        if db.groups().len() != db.groups.len() {
            return Err(VaultError::Corrupt("group tree has a cycle".to_string()));
        }
        for entry in &db.entries {
            if db.group(entry.group).is_none() {
                return Err(VaultError::Corrupt(format!(
                    "entry {} points at a missing group",
                    entry.title
                )));
            }
        }
        Ok(db)
    }

    /// Root group identity
    pub fn root(&self) -> GroupId {
        self.root
    }

    /// Look up a group
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Look up an entry
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: EntryId) -> VaultResult<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("entry {}", id)))
    }

    fn group_mut(&mut self, id: GroupId) -> VaultResult<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| VaultError::NotFound(format!("group {}", id)))
    }

    /// Direct children of a group, in insertion order
    pub fn children(&self, id: GroupId) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(move |g| g.parent == Some(id))
    }

    /// All groups in depth-first order starting at the root
    pub fn groups(&self) -> Vec<&Group> {
        let mut ordered = Vec::with_capacity(self.groups.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(group) = self.group(id) else {
                continue;
            };
            ordered.push(group);
            let children: Vec<GroupId> = self.children(id).map(|g| g.id).collect();
            stack.extend(children.into_iter().rev());
        }
        ordered
    }

    /// All entries, grouped in depth-first group order; display order only
    pub fn entries(&self) -> Vec<&Entry> {
        self.groups()
            .into_iter()
            .flat_map(|group| self.entries.iter().filter(move |e| e.group == group.id))
            .collect()
    }

    /// Raw group rows in storage order
    pub fn group_rows(&self) -> &[Group] {
        &self.groups
    }

    /// Raw entry rows in storage order
    pub fn entry_rows(&self) -> &[Entry] {
        &self.entries
    }

    /// Display path of a group, e.g. `Root/Email/`
    pub fn group_path(&self, id: GroupId) -> String {
        let mut names = Vec::new();
        let mut current = self.group(id);
        while let Some(group) = current {
            names.push(group.name.as_str());
            current = group.parent.and_then(|p| self.group(p));
        }
        names.reverse();
        let mut path = names.join("/");
        path.push('/');
        path
    }

    /// Whether `id` is `ancestor` or lies below it
    pub fn is_within(&self, id: GroupId, ancestor: GroupId) -> bool {
        let mut current = Some(id);
        while let Some(group_id) = current {
            if group_id == ancestor {
                return true;
            }
            current = self.group(group_id).and_then(|g| g.parent);
        }
        false
    }

    /// Add an empty entry to a group
    pub fn add_entry(&mut self, group: GroupId) -> VaultResult<EntryId> {
        if self.group(group).is_none() {
            return Err(VaultError::NotFound(format!("group {}", group)));
        }
        let entry = Entry::new(group);
        let id = entry.id;
        self.entries.push(entry);
        Ok(id)
    }

    /// Overwrite one field of an entry
    pub fn set_field(&mut self, id: EntryId, field: Field, value: String) -> VaultResult<()> {
        self.entry_mut(id)?.set(field, value);
        Ok(())
    }

    /// Re-parent an entry
    pub fn move_entry(&mut self, id: EntryId, group: GroupId) -> VaultResult<()> {
        if self.group(group).is_none() {
            return Err(VaultError::NotFound(format!("group {}", group)));
        }
        let entry = self.entry_mut(id)?;
        entry.group = group;
        entry.modified = Utc::now();
        Ok(())
    }

    /// Delete an entry
    pub fn remove_entry(&mut self, id: EntryId) -> VaultResult<()> {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            return Err(VaultError::NotFound(format!("entry {}", id)));
        }
        Ok(())
    }

    /// Create a group under `parent`
    pub fn add_group(&mut self, parent: GroupId, name: &str) -> VaultResult<GroupId> {
        if self.group(parent).is_none() {
            return Err(VaultError::NotFound(format!("group {}", parent)));
        }
        let id = GroupId::new();
        self.groups.push(Group {
            id,
            parent: Some(parent),
            name: name.to_string(),
        });
        Ok(id)
    }

    /// Rename a group
    pub fn rename_group(&mut self, id: GroupId, name: &str) -> VaultResult<()> {
        self.group_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Move a group below another one
    ///
    /// The root cannot move, and a group cannot move into its own subtree.
    pub fn move_group(&mut self, id: GroupId, new_parent: GroupId) -> VaultResult<()> {
        if id == self.root {
            return Err(VaultError::InvalidMove("the root group cannot move".to_string()));
        }
        if self.group(new_parent).is_none() {
            return Err(VaultError::NotFound(format!("group {}", new_parent)));
        }
        if self.is_within(new_parent, id) {
            return Err(VaultError::InvalidMove(
                "a group cannot move into itself".to_string(),
            ));
        }
        self.group_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Delete a group with its whole subtree and every entry inside it
    pub fn remove_group(&mut self, id: GroupId) -> VaultResult<()> {
        if id == self.root {
            return Err(VaultError::InvalidMove(
                "the root group cannot be deleted".to_string(),
            ));
        }
        if self.group(id).is_none() {
            return Err(VaultError::NotFound(format!("group {}", id)));
        }
        let doomed: Vec<GroupId> = self
            .groups
            .iter()
            .map(|g| g.id)
            .filter(|g| self.is_within(*g, id))
            .collect();
        self.entries.retain(|e| !doomed.contains(&e.group));
        self.groups.retain(|g| !doomed.contains(&g.id));
        Ok(())
    }
}
