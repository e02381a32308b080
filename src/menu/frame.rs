//! Navigation frames
//!
//! Each frame is one prompt of a menu session. A frame knows how to render
//! itself from the current database; what a selection does is decided by the
//! [`Navigator`](super::navigator::Navigator).
//!
//! Lists are rebuilt from the database at every render, so a position shown
//! to the user is only meaningful for the prompt it appeared in.

use crate::vault::{Database, Entry, EntryId, Field, GroupId};
use zeroize::Zeroizing;

pub const VIEW_ENTRIES: &str = "View/Type individual entries";
pub const EDIT_ENTRIES: &str = "Edit entries";
pub const ADD_ENTRY: &str = "Add entry";
pub const MANAGE_GROUPS: &str = "Manage groups";
pub const RELOAD: &str = "Reload database";
pub const KILL: &str = "Kill keymenu daemon";

/// Actions listed under the entries on the top menu
pub const TOP_ACTIONS: [&str; 6] = [
    VIEW_ENTRIES,
    EDIT_ENTRIES,
    ADD_ENTRY,
    MANAGE_GROUPS,
    RELOAD,
    KILL,
];

pub const DELETE_ENTRY: &str = "Delete entry";
pub const GENERATE_PASSWORD: &str = "Generate password";
pub const MANUAL_PASSWORD: &str = "Manually enter password";
pub const CONFIRM_NO: &str = "NO";
pub const CONFIRM_DELETE: &str = "Yes - confirm delete";
pub const YES: &str = "Yes";
pub const NO: &str = "No";

pub const CREATE_GROUP: &str = "Create group";
pub const MOVE_GROUP: &str = "Move group";
pub const RENAME_GROUP: &str = "Rename group";
pub const DELETE_GROUP: &str = "Delete group";

/// Group management actions, in menu order
pub const GROUP_ACTIONS: [&str; 4] = [CREATE_GROUP, MOVE_GROUP, RENAME_GROUP, DELETE_GROUP];

/// Fields on the edit menu, in order; the last line deletes the entry
pub const EDIT_FIELDS: [EditField; 7] = [
    EditField::Text(Field::Title),
    EditField::Path,
    EditField::Text(Field::Username),
    EditField::Password,
    EditField::Text(Field::Url),
    EditField::Notes,
    EditField::Delete,
];

/// Fields on the view menu, in order
pub const VIEW_FIELDS: [Field; 5] = [
    Field::Title,
    Field::Username,
    Field::Password,
    Field::Url,
    Field::Notes,
];

const MASK: &str = "**********";

/// One line of the edit menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Text(Field),
    Path,
    Password,
    Notes,
    Delete,
}

/// A password held by a frame while it waits for confirmation
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(MASK)
    }
}

/// Why a group is being picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPurpose {
    /// Group for a new entry
    AddEntry,
    /// New group of an existing entry
    MoveEntry(EntryId),
    /// Parent of a new group
    CreateParent,
    /// Group to move
    MoveSource,
    /// Where the group goes
    MoveDestination(GroupId),
    /// Group to rename
    RenameSource,
    /// Group to delete
    DeleteSource,
}

/// What a name prompt is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupNameAction {
    Create { parent: GroupId },
    Rename(GroupId),
}

/// What a delete confirmation removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    Entry(EntryId),
    Group(GroupId),
}

/// One element of the navigation stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Entry list followed by the top-level actions
    Top,
    ViewEntries,
    ViewEntry(EntryId),
    /// Notes of an entry, one option per line
    ViewNotes(EntryId),
    EditEntries,
    EditEntry(EntryId),
    /// Free text prompt for a single-line field
    EditText { entry: EntryId, field: Field },
    PickGroup(GroupPurpose),
    PasswordMenu(EntryId),
    GenLength(EntryId),
    GenDigits { entry: EntryId, length: usize },
    GenSpecial { entry: EntryId, length: usize, digits: bool },
    ManualPassword(EntryId),
    PasswordConfirm { entry: EntryId, first: Secret },
    ConfirmDelete(DeleteTarget),
    ManageGroups,
    GroupName(GroupNameAction),
}

/// What the selector shows for a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub prompt: String,
    pub options: Vec<String>,
    pub obscure: bool,
}

impl Menu {
    fn new(prompt: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options,
            obscure: false,
        }
    }

    fn obscured(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            options: Vec::new(),
            obscure: true,
        }
    }

    /// Interpret the selector's answer against this menu
    pub fn selection(&self, answer: &str) -> Selection {
        if answer.is_empty() {
            return Selection::Cancel;
        }
        match self.options.iter().position(|o| o == answer) {
            Some(index) => Selection::Choice(index),
            None => Selection::Text(answer.to_string()),
        }
    }
}

/// What the user did with a menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Picked the option at this position
    Choice(usize),
    /// Typed something that is not an option
    Text(String),
    /// Escaped or submitted nothing
    Cancel,
}

/// What happens to the stack after a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Show the same frame again
    Stay,
    Push(Frame),
    /// Pop this many frames; popping the last one ends the session
    Back(usize),
    /// Swap the current frame for another
    Replace(Frame),
    /// Re-read the database and restart at the top
    Reload,
    /// Stop the daemon
    Kill,
    /// End the session
    Done,
}

/// Entry list line, numbered from 1
pub fn entry_line(db: &Database, index: usize, entry: &Entry) -> String {
    format!("{} - {}{}", index + 1, db.group_path(entry.group), entry.title)
}

fn entry_lines(db: &Database) -> Vec<String> {
    db.entries()
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry_line(db, i, entry))
        .collect()
}

fn field_line(entry: &Entry, field: Field) -> String {
    let value = entry.get(field);
    let shown = match field {
        Field::Password if !value.is_empty() => MASK,
        Field::Notes if !value.is_empty() => "<Enter to view>",
        _ => value,
    };
    format!("{}: {}", field.label(), shown)
}

/// Groups offered for a purpose, in depth-first order
pub fn group_candidates(db: &Database, purpose: GroupPurpose) -> Vec<GroupId> {
    db.groups()
        .into_iter()
        .map(|g| g.id)
        .filter(|&id| match purpose {
            GroupPurpose::AddEntry | GroupPurpose::MoveEntry(_) | GroupPurpose::CreateParent => {
                true
            }
            GroupPurpose::MoveSource | GroupPurpose::RenameSource | GroupPurpose::DeleteSource => {
                id != db.root()
            }
            GroupPurpose::MoveDestination(source) => !db.is_within(id, source),
        })
        .collect()
}

impl Frame {
    /// Whether the entry or group this frame works on is gone
    pub fn is_stale(&self, db: &Database) -> bool {
        let entry_gone = |id: &EntryId| db.entry(*id).is_none();
        let group_gone = |id: &GroupId| db.group(*id).is_none();
        match self {
            Frame::ViewEntry(id)
            | Frame::ViewNotes(id)
            | Frame::EditEntry(id)
            | Frame::EditText { entry: id, .. }
            | Frame::PasswordMenu(id)
            | Frame::GenLength(id)
            | Frame::GenDigits { entry: id, .. }
            | Frame::GenSpecial { entry: id, .. }
            | Frame::ManualPassword(id)
            | Frame::PasswordConfirm { entry: id, .. }
            | Frame::PickGroup(GroupPurpose::MoveEntry(id))
            | Frame::ConfirmDelete(DeleteTarget::Entry(id)) => entry_gone(id),
            Frame::PickGroup(GroupPurpose::MoveDestination(id))
            | Frame::ConfirmDelete(DeleteTarget::Group(id))
            | Frame::GroupName(GroupNameAction::Create { parent: id })
            | Frame::GroupName(GroupNameAction::Rename(id)) => group_gone(id),
            _ => false,
        }
    }

    /// Build the prompt for this frame from the current database
    pub fn render(&self, db: &Database) -> Menu {
        match self {
            Frame::Top => {
                let mut options = entry_lines(db);
                options.extend(TOP_ACTIONS.iter().map(|s| s.to_string()));
                Menu::new("keymenu", options)
            }
            Frame::ViewEntries => Menu::new("View/Type entry", entry_lines(db)),
            Frame::EditEntries => Menu::new("Edit entry", entry_lines(db)),
            Frame::ViewEntry(id) => match db.entry(*id) {
                Some(entry) => Menu::new(
                    entry.title.clone(),
                    VIEW_FIELDS.iter().map(|f| field_line(entry, *f)).collect(),
                ),
                None => Menu::new("Entry", Vec::new()),
            },
            Frame::ViewNotes(id) => {
                let lines = db
                    .entry(*id)
                    .map(|e| e.notes.lines().map(String::from).collect())
                    .unwrap_or_default();
                Menu::new("Notes", lines)
            }
            Frame::EditEntry(id) => match db.entry(*id) {
                Some(entry) => Menu::new(
                    format!("Edit {}", entry.title),
                    EDIT_FIELDS
                        .iter()
                        .map(|f| match f {
                            EditField::Text(field) => field_line(entry, *field),
                            EditField::Path => format!("Path: {}", db.group_path(entry.group)),
                            EditField::Password => field_line(entry, Field::Password),
                            EditField::Notes => {
                                let hint = if entry.notes.is_empty() { "" } else { "<Enter to edit>" };
                                format!("Notes: {}", hint)
                            }
                            EditField::Delete => DELETE_ENTRY.to_string(),
                        })
                        .collect(),
                ),
                None => Menu::new("Edit", Vec::new()),
            },
            Frame::EditText { entry, field } => {
                let current = db
                    .entry(*entry)
                    .map(|e| e.get(*field).to_string())
                    .filter(|v| !v.is_empty());
                Menu::new(field.label(), current.into_iter().collect())
            }
            Frame::PickGroup(purpose) => {
                let prompt = match purpose {
                    GroupPurpose::AddEntry => "Group for new entry",
                    GroupPurpose::MoveEntry(_) => "Move entry to group",
                    GroupPurpose::CreateParent => "Parent group",
                    GroupPurpose::MoveSource => "Group to move",
                    GroupPurpose::MoveDestination(_) => "Move group to",
                    GroupPurpose::RenameSource => "Group to rename",
                    GroupPurpose::DeleteSource => "Group to delete",
                };
                let options = group_candidates(db, *purpose)
                    .into_iter()
                    .map(|id| db.group_path(id))
                    .collect();
                Menu::new(prompt, options)
            }
            Frame::PasswordMenu(_) => Menu::new(
                "Password",
                vec![GENERATE_PASSWORD.to_string(), MANUAL_PASSWORD.to_string()],
            ),
            Frame::GenLength(_) => Menu::new(
                "Password length",
                vec![super::password::DEFAULT_LENGTH.to_string()],
            ),
            Frame::GenDigits { .. } => Menu::new("Use digits", vec![YES.to_string(), NO.to_string()]),
            Frame::GenSpecial { .. } => Menu::new(
                "Use special characters",
                vec![YES.to_string(), NO.to_string()],
            ),
            Frame::ManualPassword(_) => Menu::obscured("Enter password"),
            Frame::PasswordConfirm { .. } => Menu::obscured("Verify password"),
            Frame::ConfirmDelete(target) => {
                let name = match target {
                    DeleteTarget::Entry(id) => db.entry(*id).map(|e| e.title.clone()),
                    DeleteTarget::Group(id) => db.group(*id).map(|_| db.group_path(*id)),
                };
                Menu::new(
                    format!("Delete {}?", name.unwrap_or_default()),
                    vec![CONFIRM_NO.to_string(), CONFIRM_DELETE.to_string()],
                )
            }
            Frame::ManageGroups => Menu::new(
                "Manage groups",
                GROUP_ACTIONS.iter().map(|s| s.to_string()).collect(),
            ),
            Frame::GroupName(GroupNameAction::Create { .. }) => {
                Menu::new("New group name", Vec::new())
            }
            Frame::GroupName(GroupNameAction::Rename(id)) => Menu::new(
                "Group name",
                db.group(*id).map(|g| g.name.clone()).into_iter().collect(),
            ),
        }
    }
}
