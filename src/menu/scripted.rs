//! Scripted selector for testing.
//!
//! Answers prompts from a queue of replies instead of running a program and
//! records every prompt it was shown. Once the queue is empty every prompt is
//! cancelled, so a session driven by a short script always ends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::selector::{Selector, SelectorError, SelectorResult};

/// How the scripted selector answers one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Return this text verbatim, as if typed or picked
    Text(String),
    /// Pick the first option containing this text; cancel if none does
    Containing(String),
    /// Cancel the prompt
    Cancel,
    /// Fail as if the selector program could not run
    Fail,
}

impl Reply {
    /// Pick the first option containing `needle`.
    pub fn containing(needle: impl Into<String>) -> Self {
        Reply::Containing(needle.into())
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

/// A prompt the scripted selector was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownPrompt {
    pub prompt: String,
    pub options: Vec<String>,
    pub obscure: bool,
}

#[derive(Debug, Default)]
struct State {
    replies: VecDeque<Reply>,
    shown: Vec<ShownPrompt>,
}

/// Mock selector.
///
/// Clones share the reply queue and the record of shown prompts.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSelector {
    state: Arc<Mutex<State>>,
}

impl ScriptedSelector {
    /// Create a selector answering with `replies` in order.
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        let selector = Self::default();
        selector.push(replies);
        selector
    }

    /// Queue more replies.
    pub fn push<I, R>(&self, replies: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        self.state().replies.extend(replies.into_iter().map(Into::into));
    }

    /// Every prompt shown so far, in order.
    pub fn shown(&self) -> Vec<ShownPrompt> {
        self.state().shown.clone()
    }

    /// Prompt labels shown so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.state().shown.iter().map(|p| p.prompt.clone()).collect()
    }

    /// Replies not consumed yet.
    pub fn remaining(&self) -> usize {
        self.state().replies.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Selector for ScriptedSelector {
    fn select(&self, prompt: &str, options: &[String], obscure: bool) -> SelectorResult<String> {
        let mut state = self.state();
        state.shown.push(ShownPrompt {
            prompt: prompt.to_string(),
            options: options.to_vec(),
            obscure,
        });

        match state.replies.pop_front().unwrap_or(Reply::Cancel) {
            Reply::Text(text) => Ok(text),
            Reply::Containing(needle) => Ok(options
                .iter()
                .find(|o| o.contains(&needle))
                .cloned()
                .unwrap_or_default()),
            Reply::Cancel => Ok(String::new()),
            Reply::Fail => Err(SelectorError::Failed {
                program: "scripted".to_string(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replies_in_order_then_cancel() {
        let selector = ScriptedSelector::new(["one", "two"]);
        assert_eq!(selector.select("a", &[], false).unwrap(), "one");
        assert_eq!(selector.select("b", &[], true).unwrap(), "two");
        assert_eq!(selector.select("c", &[], false).unwrap(), "");
        assert_eq!(selector.prompts(), vec!["a", "b", "c"]);
        assert!(selector.shown()[1].obscure);
    }

    #[test]
    fn test_containing() {
        let selector = ScriptedSelector::new([Reply::containing("mail"), Reply::containing("zzz")]);
        let opts = options(&["1 - Root/bank", "2 - Root/mail"]);
        assert_eq!(selector.select("p", &opts, false).unwrap(), "2 - Root/mail");
        assert_eq!(selector.select("p", &opts, false).unwrap(), "");
    }

    #[test]
    fn test_fail() {
        let selector = ScriptedSelector::new([Reply::Fail]);
        assert!(selector.select("p", &[], false).is_err());
    }

    #[test]
    fn test_clones_share_queue() {
        let selector = ScriptedSelector::new(Vec::<Reply>::new());
        let other = selector.clone();
        other.push(["x"]);
        assert_eq!(selector.remaining(), 1);
        assert_eq!(selector.select("p", &[], false).unwrap(), "x");
        assert_eq!(other.prompts(), vec!["p"]);
    }
}
