//! Interactive commands that stop at intermediate prompts.
//!
//! Some commands ask questions before finishing: `scp` wants a password,
//! `ssh` asks to confirm an unknown host key, installers ask `[y/N]`.
//! [`Session::send_expect_prompts`](super::Session::send_expect_prompts)
//! walks an ordered list of [`PromptResponse`]s, answering each one.

use std::time::Duration;

use regex::bytes::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::channel::compile_prompt_pattern;
use crate::error::{Result, SessionError};

/// One expected prompt and the reply to send when it shows up.
///
/// # Example
///
/// ```rust
/// use stxcli::session::PromptResponse;
///
/// # fn example() -> Result<(), stxcli::Error> {
/// let steps = vec![
///     PromptResponse::new(r"\(yes/no\)\?", "yes")?,
///     PromptResponse::hidden(r"[Pp]assword:", "secret")?,
///     PromptResponse::session_prompt(),
/// ];
/// assert!(steps[1].hidden);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PromptResponse {
    /// Pattern to wait for. `None` waits for the session prompt.
    pub pattern: Option<Regex>,

    /// Text sent once the pattern matched. `None` sends nothing.
    pub answer: Option<SecretString>,

    /// Keep the answer out of log records.
    pub hidden: bool,
}

impl PromptResponse {
    /// Wait for `pattern`, then send `answer`.
    pub fn new(pattern: &str, answer: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: Some(compile(pattern)?),
            answer: Some(SecretString::from(answer.into())),
            hidden: false,
        })
    }

    /// Like [`new`](Self::new) but the answer never reaches the logs.
    pub fn hidden(pattern: &str, answer: impl Into<String>) -> Result<Self> {
        Ok(Self {
            hidden: true,
            ..Self::new(pattern, answer)?
        })
    }

    /// Wait for `pattern` without answering.
    pub fn wait_for(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Some(compile(pattern)?),
            answer: None,
            hidden: false,
        })
    }

    /// Wait for the session prompt (the command is done).
    pub fn session_prompt() -> Self {
        Self {
            pattern: None,
            answer: None,
            hidden: false,
        }
    }

    pub(crate) fn answer_text(&self) -> Option<&str> {
        self.answer.as_ref().map(|a| a.expose_secret())
    }

    pub(crate) fn log_text(&self) -> &str {
        match (&self.answer, self.hidden) {
            (None, _) => "",
            (Some(_), true) => "********",
            (Some(answer), false) => answer.expose_secret(),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(compile_prompt_pattern(pattern).map_err(SessionError::InvalidPrompt)?)
}

/// Output captured while waiting for one [`PromptResponse`].
#[derive(Debug, Clone)]
pub struct InteractiveStep {
    /// Lines seen before the prompt matched.
    pub output: Vec<String>,

    /// The text that matched.
    pub matched: String,
}

/// Result of an interactive command.
#[derive(Debug, Clone)]
pub struct InteractiveResult {
    /// The initial command.
    pub command: String,

    /// One entry per prompt, in order.
    pub steps: Vec<InteractiveStep>,

    /// Exit status queried once the session prompt came back.
    pub exit_code: Option<i32>,

    /// Total time for the sequence.
    pub elapsed: Duration,
}

impl InteractiveResult {
    /// All captured lines, in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|step| step.output.iter().map(String::as_str))
    }
}

/// A challenge answered at most once while a command runs.
///
/// If the challenge shows up again after being answered, or has no answer
/// at all, `rejection` is returned instead.
pub(crate) struct Challenge {
    pub(crate) pattern: Regex,
    pub(crate) answer: Option<SecretString>,
    pub(crate) answered: bool,
    pub(crate) rejection: Option<SessionError>,
}

impl Challenge {
    pub(crate) fn new(
        pattern: Regex,
        answer: Option<SecretString>,
        rejection: SessionError,
    ) -> Self {
        Self {
            pattern,
            answer,
            answered: false,
            rejection: Some(rejection),
        }
    }
}
