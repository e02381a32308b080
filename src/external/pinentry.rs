//! Passphrase prompts through pinentry
//!
//! Speaks the small subset of the Assuan protocol needed to ask for one PIN:
//! `SETDESC`, `SETPROMPT`, `GETPIN`, then `BYE`.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Pinentry errors
#[derive(Debug, Error)]
pub enum PinentryError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("pinentry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("pinentry protocol error: {0}")]
    Protocol(String),
}

/// Result type for pinentry operations
pub type PinentryResult<T> = Result<T, PinentryError>;

/// A pinentry program, optionally followed by arguments
#[derive(Debug, Clone)]
pub struct Pinentry {
    program: String,
}

impl Pinentry {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Ask for a passphrase; `None` when the user cancels
    pub fn get_pin(
        &self,
        description: &str,
        prompt: &str,
    ) -> PinentryResult<Option<Zeroizing<String>>> {
        debug!("Asking for passphrase with {}", self.program);
        let mut argv = self.program.split_whitespace();
        let program = argv
            .next()
            .ok_or_else(|| PinentryError::Protocol("empty pinentry command".to_string()))?;
        let mut child = Command::new(program)
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PinentryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(PinentryError::Protocol("pipes unavailable".to_string()));
        };
        let mut reader = BufReader::new(stdout);

        let result = converse(&mut stdin, &mut reader, description, prompt);

        let _ = writeln!(stdin, "BYE");
        drop(stdin);
        let _ = child.wait();
        result
    }
}

fn converse(
    stdin: &mut impl Write,
    reader: &mut impl BufRead,
    description: &str,
    prompt: &str,
) -> PinentryResult<Option<Zeroizing<String>>> {
    expect_ok(reader)?;
    writeln!(stdin, "SETDESC {}", escape(description))?;
    stdin.flush()?;
    expect_ok(reader)?;
    writeln!(stdin, "SETPROMPT {}", escape(prompt))?;
    stdin.flush()?;
    expect_ok(reader)?;
    writeln!(stdin, "GETPIN")?;
    stdin.flush()?;
    read_pin(reader)
}

/// Read lines until `OK`, failing on `ERR`
fn expect_ok(reader: &mut impl BufRead) -> PinentryResult<()> {
    loop {
        let line = read_line(reader)?;
        if line.starts_with("OK") {
            return Ok(());
        }
        if line.starts_with("ERR") {
            return Err(PinentryError::Protocol(line));
        }
        // Comments and status lines are skipped
    }
}

/// Read the reply to `GETPIN`
fn read_pin(reader: &mut impl BufRead) -> PinentryResult<Option<Zeroizing<String>>> {
    let mut pin = Zeroizing::new(String::new());
    loop {
        let line = Zeroizing::new(read_line(reader)?);
        if let Some(data) = line.strip_prefix("D ") {
            pin.push_str(&unescape(data));
        } else if line.starts_with("OK") {
            return Ok(Some(pin));
        } else if line.starts_with("ERR") {
            // Cancel and timeout both come back as ERR
            return Ok(None);
        }
    }
}

fn read_line(reader: &mut impl BufRead) -> PinentryResult<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(PinentryError::Protocol("unexpected end of output".to_string()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Percent-escape text for an Assuan command argument
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '\n' => escaped.push_str("%0A"),
            '\r' => escaped.push_str("%0D"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Decode `%XX` escapes in a data line
fn unescape(data: &str) -> String {
    let bytes = data.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
