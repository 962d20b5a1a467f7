//! Scoped prompt overrides.
//!
//! Entering a sub-shell (`sudo su -`, `ssh` to a subcloud, a `source`d
//! environment) changes what the prompt looks like. A [`PromptGuard`]
//! swaps the session's prompt regex for the duration and restores it:
//! - The guard holds `&mut Session`, so nothing else can use the session
//! - `leave()` consumes the guard, sending the exit command
//! - Dropping the guard restores the regex and marks the session for resync
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stxcli::session::{SendOptions, Session};
//!
//! # async fn example(session: &mut Session) -> Result<(), stxcli::Error> {
//! let mut root = session.login_as_root(Duration::from_secs(30)).await?;
//! root.send("cat /etc/build.info", &SendOptions::new(Duration::from_secs(30))).await?;
//! root.leave("exit", Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use log::{debug, warn};
use regex::bytes::Regex;

use super::connection::Session;
use super::result::{CommandResult, SendOptions};
use crate::channel::{ROOT_PROMPT, compile_prompt_pattern};
use crate::error::{Result, SessionError};

/// RAII guard for a prompt override.
pub struct PromptGuard<'a> {
    session: &'a mut Session,
    previous: Option<(Regex, String)>,
}

impl<'a> PromptGuard<'a> {
    /// Switch `session` to `pattern` until the guard ends.
    pub fn enter(session: &'a mut Session, pattern: &str) -> Result<Self> {
        let regex = compile_prompt_pattern(pattern).map_err(SessionError::InvalidPrompt)?;
        debug!("[{}] entering prompt '{}'", session.name(), pattern);
        let previous = session.replace_prompt(regex, pattern.to_string());
        Ok(Self {
            session,
            previous: Some(previous),
        })
    }

    /// Prompt that will be restored.
    pub fn previous_prompt(&self) -> &str {
        self.previous.as_ref().map(|(_, s)| s.as_str()).unwrap_or_default()
    }

    /// Restore the previous prompt and run `exit_command`, which is expected
    /// to bring the shell back to it.
    pub async fn leave(mut self, exit_command: &str, timeout: Duration) -> Result<CommandResult> {
        let Some((regex, source)) = self.previous.take() else {
            return Err(SessionError::Closed.into());
        };
        debug!("[{}] leaving prompt, back to '{}'", self.session.name(), source);
        self.session.replace_prompt(regex, source);
        let opts = SendOptions::new(timeout).without_exit_code();
        self.session.send(exit_command, &opts).await
    }
}

impl Deref for PromptGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for PromptGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for PromptGuard<'_> {
    fn drop(&mut self) {
        if let Some((regex, source)) = self.previous.take() {
            warn!(
                "[{}] prompt guard dropped without leave(), restoring '{}'",
                self.session.name(),
                source
            );
            self.session.replace_prompt(regex, source);
            self.session.mark_awaiting_restore();
        }
    }
}

impl Session {
    /// Run `command` (which starts a sub-shell) and switch to its `prompt`.
    pub async fn enter_prompt(
        &mut self,
        command: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<PromptGuard<'_>> {
        let opts = SendOptions::new(timeout)
            .expect_prompt(prompt)?
            .without_exit_code();
        self.send(command, &opts).await?;
        PromptGuard::enter(self, prompt)
    }

    /// Become root with `sudo su -`.
    pub async fn login_as_root(&mut self, timeout: Duration) -> Result<PromptGuard<'_>> {
        let opts = SendOptions::new(timeout)
            .expect_prompt(ROOT_PROMPT)?
            .without_exit_code();
        self.send_sudo("su -", &opts).await?;
        PromptGuard::enter(self, ROOT_PROMPT)
    }
}
