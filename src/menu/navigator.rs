//! The menu state machine
//!
//! A session is a stack of [`Frame`]s. Each turn renders the top frame,
//! asks the selector, and turns the answer into a [`Transition`] that pushes,
//! pops or replaces frames. Cancelling always pops one frame, so backing out of
//! the top frame ends the session.

use super::autotype::AutotypeSequence;
use super::frame::{
    group_candidates, DeleteTarget, EditField, Frame, GroupNameAction, GroupPurpose, Secret,
    Selection, Transition, ADD_ENTRY, EDIT_ENTRIES, EDIT_FIELDS, KILL, MANAGE_GROUPS, RELOAD,
    TOP_ACTIONS, VIEW_ENTRIES, VIEW_FIELDS,
};
use super::password::{gen_passwd, DEFAULT_LENGTH, MAX_LENGTH};
use super::selector::{CommandSelector, Selector};
use crate::config::Config;
use crate::external::{CommandTypist, NotesEditor, TerminalEditor, Typist};
use crate::vault::{Database, DatabaseSession, EntryId, Field, VaultError, VaultResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators a menu session works with
#[derive(Clone)]
pub struct MenuTools {
    pub selector: Arc<dyn Selector>,
    pub typist: Arc<dyn Typist>,
    pub editor: Arc<dyn NotesEditor>,
    /// Sequence typed when an entry is picked from the top menu
    pub autotype: AutotypeSequence,
}

impl MenuTools {
    /// The real collaborators described by `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            selector: Arc::new(CommandSelector::new(&config.selector)),
            typist: Arc::new(CommandTypist::new(config.typing.backend)),
            editor: Arc::new(TerminalEditor::new(config.terminal(), config.editor())),
            autotype: AutotypeSequence::parse(&config.typing.autotype),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Back to idle
    Done,
    /// The user asked for the database to be re-read
    Reload,
    /// The user asked the daemon to stop
    Kill,
}

/// Show `message` as a one-line prompt and wait for it to be dismissed
pub fn show_error(selector: &dyn Selector, message: &str) {
    warn!("{}", message);
    if let Err(e) = selector.select("Error", &[message.to_string()], false) {
        warn!("Could not show error prompt: {}", e);
    }
}

/// Drives one menu session over an open database
pub struct Navigator<'a> {
    session: &'a mut DatabaseSession,
    tools: &'a MenuTools,
}

impl<'a> Navigator<'a> {
    pub fn new(session: &'a mut DatabaseSession, tools: &'a MenuTools) -> Self {
        Self { session, tools }
    }

    fn db(&self) -> &Database {
        self.session.db()
    }

    /// Run a session from the top frame until it ends
    pub fn run(&mut self) -> Outcome {
        let mut stack = vec![Frame::Top];

        while let Some(frame) = stack.last().cloned() {
            if frame.is_stale(self.db()) {
                debug!("Dropping stale frame {:?}", frame);
                stack.pop();
                continue;
            }

            let menu = frame.render(self.db());
            let answer = match self
                .tools
                .selector
                .select(&menu.prompt, &menu.options, menu.obscure)
            {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Selector failed: {}", e);
                    return Outcome::Done;
                }
            };

            match self.step(&frame, menu.selection(&answer)) {
                Transition::Stay => {}
                Transition::Push(next) => stack.push(next),
                Transition::Back(n) => stack.truncate(stack.len().saturating_sub(n)),
                Transition::Replace(next) => {
                    stack.pop();
                    stack.push(next);
                }
                Transition::Reload => return Outcome::Reload,
                Transition::Kill => return Outcome::Kill,
                Transition::Done => return Outcome::Done,
            }
        }
        Outcome::Done
    }

    /// Decide what a selection on `frame` does, performing any side effect
    pub fn step(&mut self, frame: &Frame, selection: Selection) -> Transition {
        if selection == Selection::Cancel {
            return Transition::Back(1);
        }

        match frame {
            Frame::Top => self.top(selection),
            Frame::ViewEntries => self.pick_entry(selection, Frame::ViewEntry),
            Frame::EditEntries => self.pick_entry(selection, Frame::EditEntry),
            Frame::ViewEntry(id) => self.view_entry(*id, selection),
            Frame::ViewNotes(id) => self.view_notes(*id, selection),
            Frame::EditEntry(id) => self.edit_entry(*id, selection),
            Frame::EditText { entry, field } => self.edit_text(*entry, *field, selection),
            Frame::PickGroup(purpose) => self.pick_group(*purpose, selection),
            Frame::PasswordMenu(id) => match selection {
                Selection::Choice(0) => Transition::Push(Frame::GenLength(*id)),
                Selection::Choice(1) => Transition::Push(Frame::ManualPassword(*id)),
                _ => Transition::Stay,
            },
            Frame::GenLength(id) => {
                let length = match selection {
                    Selection::Text(text) => match text.trim().parse::<usize>() {
                        Ok(length) if length <= MAX_LENGTH => length,
                        Ok(_) => {
                            show_error(
                                &*self.tools.selector,
                                &format!("Length must be at most {}", MAX_LENGTH),
                            );
                            return Transition::Stay;
                        }
                        Err(_) => return Transition::Stay,
                    },
                    _ => DEFAULT_LENGTH,
                };
                Transition::Push(Frame::GenDigits { entry: *id, length })
            }
            Frame::GenDigits { entry, length } => match yes_no(&selection) {
                Some(digits) => Transition::Push(Frame::GenSpecial {
                    entry: *entry,
                    length: *length,
                    digits,
                }),
                None => Transition::Stay,
            },
            Frame::GenSpecial {
                entry,
                length,
                digits,
            } => match yes_no(&selection) {
                Some(special) => {
                    let password = gen_passwd(*length, *digits, special);
                    let entry = *entry;
                    // Back past length, digits and the password menu to the field list
                    self.save(
                        |db| db.set_field(entry, Field::Password, password),
                        Transition::Back(4),
                    )
                }
                None => Transition::Stay,
            },
            Frame::ManualPassword(id) => match selection {
                Selection::Text(text) => Transition::Push(Frame::PasswordConfirm {
                    entry: *id,
                    first: Secret::new(text),
                }),
                _ => Transition::Stay,
            },
            Frame::PasswordConfirm { entry, first } => {
                let matches = matches!(&selection, Selection::Text(text) if text == first.expose());
                if !matches {
                    show_error(&*self.tools.selector, "Passwords do not match");
                    return Transition::Back(1);
                }
                let entry = *entry;
                let password = first.expose().to_string();
                self.save(
                    |db| db.set_field(entry, Field::Password, password),
                    Transition::Back(3),
                )
            }
            Frame::ConfirmDelete(target) => self.confirm_delete(*target, selection),
            Frame::ManageGroups => match selection {
                Selection::Choice(0) => Transition::Push(Frame::PickGroup(GroupPurpose::CreateParent)),
                Selection::Choice(1) => Transition::Push(Frame::PickGroup(GroupPurpose::MoveSource)),
                Selection::Choice(2) => Transition::Push(Frame::PickGroup(GroupPurpose::RenameSource)),
                Selection::Choice(3) => Transition::Push(Frame::PickGroup(GroupPurpose::DeleteSource)),
                _ => Transition::Stay,
            },
            Frame::GroupName(action) => self.group_name(*action, selection),
        }
    }

    fn top(&self, selection: Selection) -> Transition {
        let Selection::Choice(index) = selection else {
            return Transition::Stay;
        };

        let entries = self.db().entries();
        if let Some(entry) = entries.get(index) {
            info!("Autotyping entry {}", entry.id);
            return match self.tools.autotype.run(entry, &*self.tools.typist) {
                Ok(()) => Transition::Done,
                Err(e) => self.fail(format!("Autotype failed: {}", e)),
            };
        }

        match TOP_ACTIONS.get(index - entries.len()).copied() {
            Some(VIEW_ENTRIES) => Transition::Push(Frame::ViewEntries),
            Some(EDIT_ENTRIES) => Transition::Push(Frame::EditEntries),
            Some(ADD_ENTRY) => Transition::Push(Frame::PickGroup(GroupPurpose::AddEntry)),
            Some(MANAGE_GROUPS) => Transition::Push(Frame::ManageGroups),
            Some(RELOAD) => Transition::Reload,
            Some(KILL) => Transition::Kill,
            _ => Transition::Stay,
        }
    }

    fn pick_entry(&self, selection: Selection, next: fn(EntryId) -> Frame) -> Transition {
        match selection {
            Selection::Choice(index) => match self.db().entries().get(index) {
                Some(entry) => Transition::Push(next(entry.id)),
                None => Transition::Back(1),
            },
            _ => Transition::Stay,
        }
    }

    fn view_entry(&self, id: EntryId, selection: Selection) -> Transition {
        let Selection::Choice(index) = selection else {
            return Transition::Stay;
        };
        let (Some(entry), Some(&field)) = (self.db().entry(id), VIEW_FIELDS.get(index)) else {
            return Transition::Back(1);
        };

        let value = entry.get(field);
        if value.is_empty() {
            return Transition::Stay;
        }
        if field == Field::Notes {
            return Transition::Push(Frame::ViewNotes(id));
        }
        self.type_text(value)
    }

    fn view_notes(&self, id: EntryId, selection: Selection) -> Transition {
        let Selection::Choice(index) = selection else {
            return Transition::Stay;
        };
        match self.db().entry(id).and_then(|e| e.notes.lines().nth(index)) {
            Some(line) => self.type_text(line),
            None => Transition::Back(1),
        }
    }

    fn edit_entry(&mut self, id: EntryId, selection: Selection) -> Transition {
        let Selection::Choice(index) = selection else {
            return Transition::Stay;
        };
        let Some(&field) = EDIT_FIELDS.get(index) else {
            return Transition::Stay;
        };

        match field {
            EditField::Text(field) => Transition::Push(Frame::EditText { entry: id, field }),
            EditField::Path => Transition::Push(Frame::PickGroup(GroupPurpose::MoveEntry(id))),
            EditField::Password => Transition::Push(Frame::PasswordMenu(id)),
            EditField::Delete => Transition::Push(Frame::ConfirmDelete(DeleteTarget::Entry(id))),
            EditField::Notes => {
                let Some(current) = self.db().entry(id).map(|e| e.notes.clone()) else {
                    return Transition::Back(1);
                };
                match self.tools.editor.edit(&current) {
                    Ok(notes) if notes == current => Transition::Stay,
                    Ok(notes) => self.save(
                        |db| db.set_field(id, Field::Notes, notes),
                        Transition::Stay,
                    ),
                    Err(e) => self.fail(format!("Notes editor failed: {}", e)),
                }
            }
        }
    }

    fn edit_text(&mut self, entry: EntryId, field: Field, selection: Selection) -> Transition {
        let value = match selection {
            Selection::Text(text) => text,
            // The only option offered is the current value
            _ => match self.db().entry(entry) {
                Some(e) => e.get(field).to_string(),
                None => return Transition::Back(1),
            },
        };
        self.save(|db| db.set_field(entry, field, value), Transition::Back(1))
    }

    fn pick_group(&mut self, purpose: GroupPurpose, selection: Selection) -> Transition {
        let Selection::Choice(index) = selection else {
            return Transition::Stay;
        };
        let Some(group) = group_candidates(self.db(), purpose).get(index).copied() else {
            return Transition::Back(1);
        };

        match purpose {
            GroupPurpose::AddEntry => match self.session.commit(|db| db.add_entry(group)) {
                Ok(id) => {
                    info!("Added entry {}", id);
                    Transition::Replace(Frame::EditEntry(id))
                }
                Err(e) => self.save_failed(e),
            },
            GroupPurpose::MoveEntry(entry) => {
                self.save(|db| db.move_entry(entry, group), Transition::Back(1))
            }
            GroupPurpose::CreateParent => {
                Transition::Push(Frame::GroupName(GroupNameAction::Create { parent: group }))
            }
            GroupPurpose::MoveSource => {
                Transition::Push(Frame::PickGroup(GroupPurpose::MoveDestination(group)))
            }
            GroupPurpose::MoveDestination(source) => {
                self.save(|db| db.move_group(source, group), Transition::Back(2))
            }
            GroupPurpose::RenameSource => {
                Transition::Push(Frame::GroupName(GroupNameAction::Rename(group)))
            }
            GroupPurpose::DeleteSource => {
                Transition::Push(Frame::ConfirmDelete(DeleteTarget::Group(group)))
            }
        }
    }

    fn group_name(&mut self, action: GroupNameAction, selection: Selection) -> Transition {
        let name = match (selection, action) {
            (Selection::Text(text), _) => text.trim().to_string(),
            (_, GroupNameAction::Rename(id)) => match self.db().group(id) {
                Some(group) => group.name.clone(),
                None => return Transition::Back(1),
            },
            (_, GroupNameAction::Create { .. }) => return Transition::Stay,
        };
        if name.is_empty() {
            return Transition::Stay;
        }

        match action {
            GroupNameAction::Create { parent } => self.save(
                |db| db.add_group(parent, &name).map(|_| ()),
                Transition::Back(2),
            ),
            GroupNameAction::Rename(id) => {
                self.save(|db| db.rename_group(id, &name), Transition::Back(2))
            }
        }
    }

    fn confirm_delete(&mut self, target: DeleteTarget, selection: Selection) -> Transition {
        // Only the explicit confirm option deletes
        if selection != Selection::Choice(1) {
            debug!("Delete of {:?} not confirmed", target);
            return Transition::Back(1);
        }
        match target {
            DeleteTarget::Entry(id) => {
                info!("Deleting entry {}", id);
                self.save(|db| db.remove_entry(id), Transition::Back(2))
            }
            DeleteTarget::Group(id) => {
                info!("Deleting group {}", id);
                self.save(|db| db.remove_group(id), Transition::Back(2))
            }
        }
    }

    fn type_text(&self, text: &str) -> Transition {
        match self.tools.typist.type_string(text) {
            Ok(()) => Transition::Done,
            Err(e) => self.fail(format!("Typing failed: {}", e)),
        }
    }

    /// Commit a mutation, then go to `next`
    fn save(
        &mut self,
        mutation: impl FnOnce(&mut Database) -> VaultResult<()>,
        next: Transition,
    ) -> Transition {
        match self.session.commit(mutation) {
            Ok(()) => next,
            Err(e) => self.save_failed(e),
        }
    }

    fn save_failed(&self, error: VaultError) -> Transition {
        match error {
            // The target vanished underneath us
            VaultError::NotFound(what) => {
                debug!("Stale selection: {} not found", what);
                Transition::Back(1)
            }
            other => self.fail(format!("Failed to save database: {}", other)),
        }
    }

    fn fail(&self, message: String) -> Transition {
        show_error(&*self.tools.selector, &message);
        Transition::Done
    }
}

fn yes_no(selection: &Selection) -> Option<bool> {
    match selection {
        Selection::Choice(0) => Some(true),
        Selection::Choice(1) => Some(false),
        _ => None,
    }
}
