//! Notes editing in an external editor

use std::io::{self, Write};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Editor errors
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("Failed to prepare notes file: {0}")]
    TempFile(#[source] io::Error),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("Empty editor command")]
    EmptyCommand,
}

/// Result type for editor operations
pub type EditorResult<T> = Result<T, EditorError>;

/// Lets the user edit a block of text
pub trait NotesEditor: Send + Sync {
    /// Edit `initial` and return the new text
    fn edit(&self, initial: &str) -> EditorResult<String>;
}

/// Runs `terminal -e editor <file>` on a private temporary file
#[derive(Debug, Clone)]
pub struct TerminalEditor {
    terminal: String,
    editor: String,
}

impl TerminalEditor {
    pub fn new(terminal: impl Into<String>, editor: impl Into<String>) -> Self {
        Self {
            terminal: terminal.into(),
            editor: editor.into(),
        }
    }

    /// Full argument vector for editing `file`
    fn command_line(&self, file: &str) -> EditorResult<Vec<String>> {
        let mut argv: Vec<String> = self.terminal.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err(EditorError::EmptyCommand);
        }
        argv.push("-e".to_string());
        let editor: Vec<String> = self.editor.split_whitespace().map(String::from).collect();
        if editor.is_empty() {
            return Err(EditorError::EmptyCommand);
        }
        argv.extend(editor);
        argv.push(file.to_string());
        Ok(argv)
    }
}

impl NotesEditor for TerminalEditor {
    fn edit(&self, initial: &str) -> EditorResult<String> {
        // tempfile creates the file with owner-only permissions and removes it on drop
        let mut file = tempfile::Builder::new()
            .prefix("keymenu-notes-")
            .suffix(".txt")
            .tempfile()
            .map_err(EditorError::TempFile)?;
        file.write_all(initial.as_bytes())
            .and_then(|_| file.flush())
            .map_err(EditorError::TempFile)?;

        let path = file.path().to_string_lossy().into_owned();
        let argv = self.command_line(&path)?;
        debug!("Opening notes editor: {:?}", argv);

        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .map_err(|source| EditorError::Spawn {
                program: argv[0].clone(),
                source,
            })?;
        if !status.success() {
            return Err(EditorError::Failed {
                program: argv[0].clone(),
                status: status.to_string(),
            });
        }

        let edited = Zeroizing::new(std::fs::read_to_string(file.path()).map_err(EditorError::TempFile)?);
        Ok(edited.trim_end_matches('\n').to_string())
    }
}

/// Mock editor that returns queued texts and records what it was given.
#[derive(Debug, Clone, Default)]
pub struct FixedEditor {
    inner: Arc<Mutex<FixedEditorState>>,
}

#[derive(Debug, Default)]
struct FixedEditorState {
    replies: Vec<String>,
    seen: Vec<String>,
}

impl FixedEditor {
    /// Editor that answers with `replies` in order, then echoes its input
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            inner: Arc::new(Mutex::new(FixedEditorState {
                replies,
                seen: Vec::new(),
            })),
        }
    }

    /// Initial texts passed to `edit`, in order
    pub fn seen(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .clone()
    }
}

impl NotesEditor for FixedEditor {
    fn edit(&self, initial: &str) -> EditorResult<String> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.seen.push(initial.to_string());
        Ok(state.replies.pop().unwrap_or_else(|| initial.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let editor = TerminalEditor::new("alacritty --class notes", "nvim -n");
        assert_eq!(
            editor.command_line("/tmp/x").unwrap(),
            vec!["alacritty", "--class", "notes", "-e", "nvim", "-n", "/tmp/x"]
        );
    }

    #[test]
    fn test_command_line_empty() {
        let editor = TerminalEditor::new("  ", "vim");
        assert!(matches!(
            editor.command_line("/tmp/x"),
            Err(EditorError::EmptyCommand)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_edit_reads_back_file() {
        // `sh -e script file` stands in for `terminal -e editor file`
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = temp_dir.path().join("editor.sh");
        std::fs::write(&script, "printf ' and more\\n' >> \"$1\"\n").unwrap();

        let editor = TerminalEditor::new("sh", script.to_string_lossy());
        let edited = editor.edit("line one").unwrap();
        assert_eq!(edited, "line one and more");
    }

    #[cfg(unix)]
    #[test]
    fn test_edit_reports_failure() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = temp_dir.path().join("editor.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let editor = TerminalEditor::new("sh", script.to_string_lossy());
        assert!(matches!(
            editor.edit("x"),
            Err(EditorError::Failed { .. })
        ));
    }

    #[test]
    fn test_fixed_editor() {
        let editor = FixedEditor::new(["first"]);
        assert_eq!(editor.edit("old").unwrap(), "first");
        assert_eq!(editor.edit("again").unwrap(), "again");
        assert_eq!(editor.seen(), vec!["old", "again"]);
    }
}
