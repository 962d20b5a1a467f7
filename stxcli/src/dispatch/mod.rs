//! Running structured invocations on a session.
//!
//! A [`Dispatcher`] renders an [`Invocation`] to a shell line, prefixes the
//! credential profile it names, runs it on a [`CommandTarget`] and turns a
//! non-zero exit into [`CommandError::Failed`] unless the invocation says
//! otherwise.

mod invocation;

pub use invocation::{FlagValue, Invocation, InvocationBuilder, JoinPolicy, RetryPolicy};

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{CommandError, Result};
use crate::registry::Inventory;
use crate::session::{CommandResult, SendOptions, Session};

/// Something that can run a shell line: a [`Session`], or a registry
/// name that resolves to one.
pub trait CommandTarget: Send {
    /// Run `command` and wait for the prompt.
    fn send(&mut self, command: &str, opts: &SendOptions) -> impl Future<Output = Result<CommandResult>> + Send;

    /// Run `command` through `sudo`.
    fn send_sudo(
        &mut self,
        command: &str,
        opts: &SendOptions,
    ) -> impl Future<Output = Result<CommandResult>> + Send;
}

impl CommandTarget for Session {
    fn send(&mut self, command: &str, opts: &SendOptions) -> impl Future<Output = Result<CommandResult>> + Send {
        Session::send(self, command, opts)
    }

    fn send_sudo(
        &mut self,
        command: &str,
        opts: &SendOptions,
    ) -> impl Future<Output = Result<CommandResult>> + Send {
        Session::send_sudo(self, command, opts)
    }
}

/// Runs invocations, resolving credential profiles through an [`Inventory`].
#[derive(Clone)]
pub struct Dispatcher {
    inventory: Arc<dyn Inventory>,
}

impl Dispatcher {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self { inventory }
    }

    /// The line `invocation` runs as, credential prefix included.
    ///
    /// Sudo is not part of the line; [`run`](Self::run) adds it through
    /// [`CommandTarget::send_sudo`].
    pub fn command_line(&self, invocation: &Invocation) -> Result<String> {
        let command = invocation.to_line();
        let Some(profile) = invocation.credentials() else {
            return Ok(command);
        };
        let snippet = self.inventory.credential_profile(profile)?;
        if invocation.sudo() {
            let script = format!("{snippet} && {command}");
            Ok(format!("bash -c {}", shell_words::quote(&script)))
        } else {
            Ok(format!("{snippet} && {command}"))
        }
    }

    /// Run `invocation` on `target`.
    ///
    /// The invocation's timeout bounds every attempt and every retry sleep.
    /// A timeout surfaces as the session's [`SessionError::Timeout`]
    /// (the session has already interrupted the command).
    ///
    /// [`SessionError::Timeout`]: crate::error::SessionError::Timeout
    pub async fn run<T: CommandTarget>(&self, invocation: &Invocation, target: &mut T) -> Result<CommandResult> {
        let line = self.command_line(invocation)?;
        let retry = invocation.retry();
        let deadline = Instant::now() + invocation.timeout();
        let mut attempt = 0;

        loop {
            let opts = SendOptions::new(deadline.saturating_duration_since(Instant::now()));
            let result = if invocation.sudo() {
                target.send_sudo(&line, &opts).await?
            } else {
                target.send(&line, &opts).await?
            };
            debug!("'{}' exited with {}", invocation.tool(), result.code());

            if result.is_success() || invocation.expect_nonzero_ok() {
                return Ok(result);
            }

            let failure = CommandError::Failed {
                command: line.clone(),
                exit_code: result.code(),
                output: result.lines,
            };
            if attempt >= retry.retries {
                return Err(failure.into());
            }
            let wake = Instant::now() + retry.check_interval;
            if wake >= deadline {
                warn!("no time left to retry '{}'", invocation);
                return Err(failure.into());
            }
            attempt += 1;
            warn!(
                "'{}' failed, retry {}/{} in {:?}",
                invocation, attempt, retry.retries, retry.check_interval
            );
            tokio::time::sleep_until(wake).await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
