//! Selector programs (dmenu, rofi and friends)
//!
//! Every prompt is one run of the configured program: candidate lines go in on
//! stdin, the chosen or typed line comes back on stdout. An empty answer means
//! the user cancelled.

use crate::config::{Dialect, SelectorConfig};
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Selector errors
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Failed to run selector {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Selector I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Selector {program} failed: {message}")]
    Failed { program: String, message: String },
}

/// Result type for selector operations
pub type SelectorResult<T> = Result<T, SelectorError>;

/// Shows a prompt and returns what the user picked or typed
pub trait Selector: Send + Sync {
    /// Show `options` under `prompt`; `""` when cancelled
    ///
    /// With `obscure` set the typed characters are hidden, for passphrases.
    fn select(&self, prompt: &str, options: &[String], obscure: bool) -> SelectorResult<String>;
}

/// Runs the configured selector program
#[derive(Debug, Clone)]
pub struct CommandSelector {
    config: SelectorConfig,
    dialect: Dialect,
}

impl CommandSelector {
    pub fn new(config: &SelectorConfig) -> Self {
        Self {
            dialect: config.effective_dialect(),
            config: config.clone(),
        }
    }

    /// Arguments for one prompt: configured ones first, then the dialect's
    pub fn args(&self, prompt: &str, lines: usize, obscure: bool) -> Vec<String> {
        let mut args = self.config.args.clone();
        match self.dialect {
            Dialect::Rofi => {
                args.push("-dmenu".to_string());
                args.push("-p".to_string());
                args.push(prompt.to_string());
                args.push("-l".to_string());
                // rofi treats `-l 0` as "use the theme default"
                args.push(lines.max(1).to_string());
                if obscure {
                    args.push("-password".to_string());
                }
            }
            Dialect::Dmenu => {
                args.push("-p".to_string());
                args.push(prompt.to_string());
                args.push("-l".to_string());
                args.push(lines.to_string());
                if obscure {
                    let color = &self.config.obscure_color;
                    args.extend([
                        "-nb".to_string(),
                        color.clone(),
                        "-nf".to_string(),
                        color.clone(),
                    ]);
                }
            }
        }
        args
    }
}

impl Selector for CommandSelector {
    fn select(&self, prompt: &str, options: &[String], obscure: bool) -> SelectorResult<String> {
        let program = &self.config.command;
        let obscure = obscure && self.config.obscure;
        let args = self.args(prompt, options.len(), obscure);
        debug!("Running {} for prompt {:?} with {} options", program, prompt, options.len());

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SelectorError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(stdin) = child.stdin.take() {
            feed(&mut child, stdin, &options.join("\n"))?;
        }

        let output = child.wait_with_output()?;
        let answer = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        // dmenu and rofi exit 1 on escape with nothing printed
        if !output.status.success() && answer.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.code() == Some(1) || stderr.trim().is_empty() {
                return Ok(String::new());
            }
            return Err(SelectorError::Failed {
                program: program.clone(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(answer)
    }
}

/// Write `input` to the selector, reaping the child if the write fails
///
/// A selector may exit before reading everything; that is a cancel, not an
/// error. `stdin` is dropped on return so the child sees end of input.
fn feed(child: &mut Child, mut stdin: impl Write, input: &str) -> io::Result<()> {
    match stdin.write_all(input.as_bytes()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => {
            drop(stdin);
            if let Err(kill_err) = child.kill() {
                debug!("Selector already exited: {}", kill_err);
            }
            if let Err(wait_err) = child.wait() {
                debug!("Failed to reap selector: {}", wait_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(command: &str, args: &[&str]) -> CommandSelector {
        CommandSelector::new(&SelectorConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn test_dmenu_args() {
        let selector = selector("dmenu", &["-i"]);
        assert_eq!(selector.args("Entries", 3, false), vec!["-i", "-p", "Entries", "-l", "3"]);
    }

    #[test]
    fn test_dmenu_obscure_args() {
        let selector = selector("dmenu", &[]);
        assert_eq!(
            selector.args("Passphrase", 0, true),
            vec!["-p", "Passphrase", "-l", "0", "-nb", "#222222", "-nf", "#222222"]
        );
    }

    #[test]
    fn test_rofi_args() {
        let selector = selector("rofi", &["-theme", "dark"]);
        assert_eq!(
            selector.args("Entries", 0, false),
            vec!["-theme", "dark", "-dmenu", "-p", "Entries", "-l", "1"]
        );
        assert_eq!(
            selector.args("Passphrase", 5, true),
            vec!["-theme", "dark", "-dmenu", "-p", "Passphrase", "-l", "5", "-password"]
        );
    }

    #[test]
    fn test_dialect_override() {
        let selector = CommandSelector::new(&SelectorConfig {
            command: "my-launcher".to_string(),
            dialect: Some(Dialect::Rofi),
            ..Default::default()
        });
        assert_eq!(selector.args("p", 2, false)[0], "-dmenu");
    }

    #[cfg(unix)]
    #[test]
    fn test_select_reads_answer() {
        // `head -n 1` picks the first candidate line and ignores the flags it
        // cannot see because they go through `sh -c`
        let selector = selector("sh", &["-c", "head -n 1", "sh"]);
        let answer = selector
            .select("p", &["first".to_string(), "second".to_string()], false)
            .unwrap();
        assert_eq!(answer, "first");
    }

    #[cfg(unix)]
    #[test]
    fn test_select_cancel_is_empty() {
        let selector = selector("sh", &["-c", "exit 1", "sh"]);
        let answer = selector.select("p", &["a".to_string()], false).unwrap();
        assert_eq!(answer, "");
    }

    /// Writer that fails every write with `kind`
    struct FailingStdin(io::ErrorKind);

    impl Write for FailingStdin {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "stdin write failed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_reaps_selector() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let result = feed(&mut child, FailingStdin(io::ErrorKind::Other), "a\nb");
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Other);
        // Already waited on, so the exit status is at hand
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_pipe_is_not_an_error() {
        let mut child = Command::new("true").spawn().unwrap();
        assert!(feed(&mut child, FailingStdin(io::ErrorKind::BrokenPipe), "a").is_ok());
        child.wait().unwrap();
    }

    #[test]
    fn test_select_missing_program() {
        let selector = selector("definitely_not_a_real_selector_12345", &[]);
        assert!(matches!(
            selector.select("p", &[], false),
            Err(SelectorError::Spawn { .. })
        ));
    }
}
