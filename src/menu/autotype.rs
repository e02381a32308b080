//! Autotype sequences
//!
//! A sequence such as `{USERNAME}{TAB}{PASSWORD}{ENTER}` is parsed once into
//! tokens and then replayed against an entry through a [`Typist`].

use crate::external::{Key, Typist, TypistResult};
use crate::vault::{Entry, Field};
use std::time::Duration;

/// One step of an autotype sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Type the value of an entry field
    Field(Field),
    /// Press a key
    Key(Key),
    /// Pause between keystrokes
    Delay(Duration),
    /// Type the text as-is
    Literal(String),
}

/// Parsed autotype sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutotypeSequence {
    tokens: Vec<Token>,
}

impl AutotypeSequence {
    /// Parse a sequence; unknown placeholders are kept as literal text
    pub fn parse(sequence: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = sequence;

        while let Some(start) = rest.find('{') {
            literal.push_str(&rest[..start]);
            let after = &rest[start..];
            let Some(end) = after.find('}') else {
                rest = after;
                break;
            };
            let placeholder = &after[1..end];
            match placeholder_token(placeholder) {
                Some(token) => {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(token);
                }
                None => literal.push_str(&after[..=end]),
            }
            rest = &after[end + 1..];
        }
        // Whatever is left, including an unclosed brace, is plain text
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Replay the sequence for `entry`
    pub fn run(&self, entry: &Entry, typist: &dyn Typist) -> TypistResult<()> {
        for token in &self.tokens {
            match token {
                Token::Field(field) => {
                    let value = entry.get(*field);
                    if !value.is_empty() {
                        typist.type_string(value)?;
                    }
                }
                Token::Key(key) => typist.tap_key(*key)?,
                Token::Delay(delay) => std::thread::sleep(*delay),
                Token::Literal(text) => typist.type_string(text)?,
            }
        }
        Ok(())
    }
}

fn placeholder_token(name: &str) -> Option<Token> {
    let token = match name.to_ascii_uppercase().as_str() {
        "TITLE" => Token::Field(Field::Title),
        "USERNAME" => Token::Field(Field::Username),
        "PASSWORD" => Token::Field(Field::Password),
        "URL" => Token::Field(Field::Url),
        "NOTES" => Token::Field(Field::Notes),
        "TAB" => Token::Key(Key::Tab),
        "ENTER" => Token::Key(Key::Enter),
        upper => {
            let millis = upper.strip_prefix("DELAY=")?.trim().parse().ok()?;
            Token::Delay(Duration::from_millis(millis))
        }
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_AUTOTYPE;
    use crate::external::typist::{RecordingTypist, Typed};
    use crate::vault::GroupId;

    fn entry() -> Entry {
        let mut entry = Entry::new(GroupId::new());
        entry.set(Field::Username, "alice".to_string());
        entry.set(Field::Password, "s3cret".to_string());
        entry
    }

    #[test]
    fn test_parse_default_sequence() {
        let sequence = AutotypeSequence::parse(DEFAULT_AUTOTYPE);
        assert_eq!(
            sequence.tokens(),
            &[
                Token::Field(Field::Username),
                Token::Key(Key::Tab),
                Token::Field(Field::Password),
                Token::Key(Key::Enter),
            ]
        );
    }

    #[test]
    fn test_parse_literals_and_delay() {
        let sequence = AutotypeSequence::parse("user:{USERNAME}{DELAY=150} done");
        assert_eq!(
            sequence.tokens(),
            &[
                Token::Literal("user:".to_string()),
                Token::Field(Field::Username),
                Token::Delay(Duration::from_millis(150)),
                Token::Literal(" done".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_placeholder_is_literal() {
        let sequence = AutotypeSequence::parse("{FOO}{url}{DELAY=x}{");
        assert_eq!(
            sequence.tokens(),
            &[
                Token::Literal("{FOO}".to_string()),
                Token::Field(Field::Url),
                Token::Literal("{DELAY=x}{".to_string()),
            ]
        );
    }

    #[test]
    fn test_run_types_fields_and_keys() {
        let typist = RecordingTypist::new();
        AutotypeSequence::parse(DEFAULT_AUTOTYPE)
            .run(&entry(), &typist)
            .unwrap();
        assert_eq!(
            typist.typed(),
            vec![
                Typed::Text("alice".to_string()),
                Typed::Key(Key::Tab),
                Typed::Text("s3cret".to_string()),
                Typed::Key(Key::Enter),
            ]
        );
    }

    #[test]
    fn test_run_skips_empty_fields() {
        let typist = RecordingTypist::new();
        AutotypeSequence::parse("{URL}{ENTER}")
            .run(&entry(), &typist)
            .unwrap();
        assert_eq!(typist.typed(), vec![Typed::Key(Key::Enter)]);
    }
}
