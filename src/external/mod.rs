//! Adapters for the programs keymenu drives: keystroke injection, the notes
//! editor and pinentry
//!
//! Each collaborator sits behind a trait with a subprocess-backed
//! implementation and an in-memory one for tests.

pub mod editor;
pub mod pinentry;
pub mod typist;

pub use editor::{EditorError, FixedEditor, NotesEditor, TerminalEditor};
pub use pinentry::{Pinentry, PinentryError};
pub use typist::{CommandTypist, Key, RecordingTypist, Typist, TypistError, TypistResult};
