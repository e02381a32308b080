//! Keyboard injection
//!
//! Typing goes through an external tool chosen by `[typing] backend`. The
//! worker only sees the [`Typist`] trait, so tests swap in a
//! [`RecordingTypist`].

use crate::config::TypingBackend;
use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Keystroke errors
#[derive(Debug, Error)]
pub enum TypistError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}

/// Result type for typing operations
pub type TypistResult<T> = Result<T, TypistError>;

/// Keys that can be pressed on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Enter,
}

/// Injects keystrokes into the focused window
pub trait Typist: Send + Sync {
    /// Type `text` literally
    fn type_string(&self, text: &str) -> TypistResult<()>;

    /// Press and release a single key
    fn tap_key(&self, key: Key) -> TypistResult<()>;
}

/// Typist backed by xdotool, ydotool or wtype
#[derive(Debug, Clone, Copy)]
pub struct CommandTypist {
    backend: TypingBackend,
}

impl CommandTypist {
    pub fn new(backend: TypingBackend) -> Self {
        Self { backend }
    }

    fn program(&self) -> &'static str {
        match self.backend {
            TypingBackend::Xdotool => "xdotool",
            TypingBackend::Ydotool => "ydotool",
            TypingBackend::Wtype => "wtype",
        }
    }

    /// Arguments that type `text`
    fn type_args(&self, text: &str) -> Vec<String> {
        let mut args: Vec<String> = match self.backend {
            TypingBackend::Xdotool => vec!["type".into(), "--clearmodifiers".into()],
            TypingBackend::Ydotool => vec!["type".into()],
            TypingBackend::Wtype => Vec::new(),
        };
        args.push("--".into());
        args.push(text.to_string());
        args
    }

    /// Arguments that press `key`
    fn key_args(&self, key: Key) -> Vec<String> {
        match (self.backend, key) {
            (TypingBackend::Xdotool, Key::Tab) => vec!["key".into(), "Tab".into()],
            (TypingBackend::Xdotool, Key::Enter) => vec!["key".into(), "Return".into()],
            // ydotool speaks Linux input keycodes: press then release
            (TypingBackend::Ydotool, Key::Tab) => {
                vec!["key".into(), "15:1".into(), "15:0".into()]
            }
            (TypingBackend::Ydotool, Key::Enter) => {
                vec!["key".into(), "28:1".into(), "28:0".into()]
            }
            (TypingBackend::Wtype, Key::Tab) => vec!["-k".into(), "Tab".into()],
            (TypingBackend::Wtype, Key::Enter) => vec!["-k".into(), "Return".into()],
        }
    }

    fn run(&self, args: Vec<String>) -> TypistResult<()> {
        let program = self.program();
        let status = Command::new(program)
            .args(&args)
            .status()
            .map_err(|source| TypistError::Spawn {
                program: program.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(TypistError::Failed {
                program: program.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

impl Typist for CommandTypist {
    fn type_string(&self, text: &str) -> TypistResult<()> {
        debug!("Typing {} characters with {}", text.chars().count(), self.program());
        self.run(self.type_args(text))
    }

    fn tap_key(&self, key: Key) -> TypistResult<()> {
        debug!("Pressing {:?} with {}", key, self.program());
        self.run(self.key_args(key))
    }
}

/// Something a [`RecordingTypist`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Typed {
    Text(String),
    Key(Key),
}

/// Mock typist that records keystrokes instead of sending them.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingTypist {
    typed: Arc<Mutex<Vec<Typed>>>,
}

impl RecordingTypist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything typed so far, in order
    pub fn typed(&self) -> Vec<Typed> {
        self.typed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the text parts, in order
    pub fn texts(&self) -> Vec<String> {
        self.typed()
            .into_iter()
            .filter_map(|t| match t {
                Typed::Text(text) => Some(text),
                Typed::Key(_) => None,
            })
            .collect()
    }

    fn record(&self, typed: Typed) {
        self.typed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(typed);
    }
}

impl Typist for RecordingTypist {
    fn type_string(&self, text: &str) -> TypistResult<()> {
        self.record(Typed::Text(text.to_string()));
        Ok(())
    }

    fn tap_key(&self, key: Key) -> TypistResult<()> {
        self.record(Typed::Key(key));
        Ok(())
    }
}
