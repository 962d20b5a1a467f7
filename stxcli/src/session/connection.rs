//! Prompt-driven interactive session over one shell channel.
//!
//! Every operation writes a line, then reads until the current prompt regex
//! matches the tail of the output (or a deadline passes). Exit codes are
//! fetched with a separate `echo $?` round trip.

use std::time::Duration;

use log::{debug, info, trace, warn};
use regex::bytes::Regex;
use secrecy::ExposeSecret;
use tokio::time::Instant;

use super::config::SessionConfig;
use super::interactive::{Challenge, InteractiveResult, InteractiveStep, PromptResponse};
use super::result::{CommandResult, SendOptions, normalize};
use crate::channel::patterns::{PASSWORD_PATTERN, parse_exit_code};
use crate::channel::{PatternBuffer, compile_prompt_pattern};
use crate::error::{Error, ErrorKind, Result, SessionError};
use crate::transport::{Connector, ShellChannel};

const INTERRUPT: &[u8] = b"\x03";
const EXIT_CODE_QUERY: &str = "echo $?";

/// Output must stay quiet this long before a resync counts as settled.
const DRAIN_QUIET: Duration = Duration::from_millis(200);

/// Where the remote shell is relative to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel.
    Closed,
    /// Sitting at the prompt.
    Idle,
    /// A command line was written and its prompt not seen yet.
    InCommand,
    /// A prompt override ended without the shell returning to the old prompt.
    AwaitingPromptRestore,
}

/// An interactive shell on one host as one user.
///
/// Operations take `&mut self`: one command at a time per session.
pub struct Session {
    config: SessionConfig,
    shell: Option<Box<dyn ShellChannel>>,
    buffer: PatternBuffer,
    prompt: Regex,
    prompt_source: String,
    state: SessionState,
    last_exit_code: Option<i32>,
}

impl Session {
    /// Connect with `connector` and wait for the first prompt.
    pub async fn open(config: SessionConfig, connector: &dyn Connector) -> Result<Self> {
        info!(
            "[{}] opening session to {}@{}:{}",
            config.name, config.ssh.username, config.ssh.host, config.ssh.port
        );
        let shell = connector.connect(&config.ssh).await?;
        Self::attach(config, shell).await
    }

    /// Drive an already opened shell channel.
    ///
    /// Waits for the login prompt, then runs the configured on-open commands.
    pub async fn attach(config: SessionConfig, shell: Box<dyn ShellChannel>) -> Result<Self> {
        let prompt = compile_prompt_pattern(&config.prompt).map_err(SessionError::InvalidPrompt)?;
        let mut session = Self {
            buffer: PatternBuffer::new(config.search_depth),
            prompt_source: config.prompt.clone(),
            prompt: prompt.clone(),
            shell: Some(shell),
            state: SessionState::InCommand,
            last_exit_code: None,
            config,
        };

        let timeout = session.config.ssh.timeout;
        let deadline = Instant::now() + timeout;
        if let Err(e) = session.read_until(&[&prompt], deadline, "<login>", timeout).await {
            session.mark_closed().await;
            return Err(e);
        }
        session.state = SessionState::Idle;
        debug!("[{}] login prompt detected", session.config.name);

        let commands = session.config.on_open_commands.clone();
        for command in &commands {
            let result = session.send(command, &SendOptions::new(timeout)).await?;
            if !result.is_success() {
                warn!(
                    "[{}] on-open command '{}' exited with {}",
                    session.config.name,
                    command,
                    result.code()
                );
            }
        }

        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `(host, username)`.
    pub fn identity(&self) -> (&str, &str) {
        self.config.identity()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the channel is up and the session usable.
    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed && self.shell.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Source of the current prompt regex.
    pub fn prompt(&self) -> &str {
        &self.prompt_source
    }

    /// Exit code of the most recent command that queried one.
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Replace the prompt regex for all subsequent operations.
    pub fn set_prompt(&mut self, pattern: &str) -> Result<()> {
        let regex = compile_prompt_pattern(pattern).map_err(SessionError::InvalidPrompt)?;
        debug!("[{}] prompt set to '{}'", self.config.name, pattern);
        self.replace_prompt(regex, pattern.to_string());
        Ok(())
    }

    pub(super) fn replace_prompt(&mut self, regex: Regex, source: String) -> (Regex, String) {
        let regex = std::mem::replace(&mut self.prompt, regex);
        let source = std::mem::replace(&mut self.prompt_source, source);
        (regex, source)
    }

    pub(super) fn mark_awaiting_restore(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::AwaitingPromptRestore;
        }
    }

    /// Run `command` and wait for the prompt.
    ///
    /// On timeout the command is interrupted and the prompt regained before
    /// the error is returned. If the prompt cannot be regained the session
    /// is closed.
    pub async fn send(&mut self, command: &str, opts: &SendOptions) -> Result<CommandResult> {
        let start = Instant::now();
        let deadline = start + opts.timeout;
        self.prepare().await?;

        debug!("[{}] send: {}", self.config.name, command);
        self.write_line(command).await?;

        let prompt = opts
            .expect_prompt
            .clone()
            .unwrap_or_else(|| self.prompt.clone());
        let raw = match self.read_until(&[&prompt], deadline, command, opts.timeout).await {
            Ok((_, raw)) => raw,
            Err(e) => return Err(self.abandon(e).await),
        };

        let (lines, prompt_text) = normalize(&raw, command);
        self.finish(command, lines, prompt_text, opts, &prompt, deadline, start)
            .await
    }

    /// Run `command` through `sudo`, answering one password challenge.
    ///
    /// A second challenge for the same command means the password was
    /// rejected: the command is interrupted and the session closed.
    pub async fn send_sudo(&mut self, command: &str, opts: &SendOptions) -> Result<CommandResult> {
        let line = format!("sudo {command}");
        let user = self.config.ssh.username.clone();
        let rejection = match self.config.effective_sudo_password() {
            Some(_) => SessionError::SudoAuthFailed { user },
            None => SessionError::NoSudoPassword { user },
        };
        let challenge = Challenge::new(
            PASSWORD_PATTERN.clone(),
            self.config.effective_sudo_password().cloned(),
            rejection,
        );

        let result = self.send_with_challenges(&line, vec![challenge], opts).await;
        if let Err(e) = &result
            && e.kind() == ErrorKind::AuthError
        {
            warn!("[{}] closing session: {}", self.config.name, e);
            self.mark_closed().await;
        }
        result
    }

    /// Run `command` for at most `run_for`, then interrupt it.
    ///
    /// Returns whatever the command printed (the output of `ping` or
    /// `tail -f`, say). Commands that finish earlier return normally.
    pub async fn send_for(&mut self, command: &str, run_for: Duration) -> Result<CommandResult> {
        let start = Instant::now();
        self.prepare().await?;

        debug!("[{}] send for {:?}: {}", self.config.name, run_for, command);
        self.write_line(command).await?;

        let prompt = self.prompt.clone();
        let raw = match self.read_until(&[&prompt], start + run_for, command, run_for).await {
            Ok((_, raw)) => raw,
            Err(Error::Session(SessionError::Timeout { .. })) => {
                debug!("[{}] interrupting '{}'", self.config.name, command);
                let mut partial = self.buffer.take();
                self.write_raw(INTERRUPT).await?;
                let budget = self.config.recovery_timeout;
                match self
                    .read_until(&[&prompt], Instant::now() + budget, command, budget)
                    .await
                {
                    Ok((_, rest)) => {
                        partial.extend_from_slice(&rest);
                        partial
                    }
                    Err(e) => return Err(self.abandon(e).await),
                }
            }
            Err(e) => return Err(self.abandon(e).await),
        };

        let (mut lines, prompt_text) = normalize(&raw, command);
        strip_interrupt_echo(&mut lines);

        let budget = self.config.recovery_timeout;
        let opts = SendOptions::new(budget);
        self.finish(
            command,
            lines,
            prompt_text,
            &opts,
            &prompt,
            Instant::now() + budget,
            start,
        )
        .await
    }

    /// Send Ctrl-C and wait for the prompt to come back.
    pub async fn interrupt(&mut self) -> Result<()> {
        if self.shell.is_none() {
            return Err(self.not_connected());
        }
        info!("[{}] sending interrupt", self.config.name);
        if let Err(e) = self.recover().await {
            warn!("[{}] prompt not regained after interrupt: {}", self.config.name, e);
            self.mark_closed().await;
            return Err(e);
        }
        Ok(())
    }

    /// Send `command`, then wait for and answer each response in order.
    ///
    /// Ends at the session prompt, appending a final wait for it when the
    /// last response targets some other pattern, then queries the exit code.
    pub async fn send_expect_prompts(
        &mut self,
        command: &str,
        responses: &[PromptResponse],
        timeout: Duration,
    ) -> Result<InteractiveResult> {
        let start = Instant::now();
        let deadline = start + timeout;
        self.prepare().await?;

        debug!("[{}] send interactive: {}", self.config.name, command);
        self.write_line(command).await?;

        let session_prompt = self.prompt.clone();
        let mut steps = Vec::with_capacity(responses.len() + 1);
        let mut echo = command.to_string();
        let mut at_prompt = false;

        for response in responses {
            let pattern = response
                .pattern
                .clone()
                .unwrap_or_else(|| session_prompt.clone());
            let raw = match self.read_until(&[&pattern], deadline, command, timeout).await {
                Ok((_, raw)) => raw,
                Err(e) => return Err(self.abandon(e).await),
            };
            let (output, matched) = normalize(&raw, &echo);
            steps.push(InteractiveStep { output, matched });
            at_prompt = response.pattern.is_none();

            echo.clear();
            if let Some(answer) = response.answer_text() {
                debug!("[{}] answering: {}", self.config.name, response.log_text());
                self.write_line(answer).await?;
                if !response.hidden {
                    echo.push_str(answer);
                }
                at_prompt = false;
            }
        }

        if !at_prompt {
            let raw = match self
                .read_until(&[&session_prompt], deadline, command, timeout)
                .await
            {
                Ok((_, raw)) => raw,
                Err(e) => return Err(self.abandon(e).await),
            };
            let (output, matched) = normalize(&raw, &echo);
            steps.push(InteractiveStep { output, matched });
        }

        let exit_code = self
            .query_exit_code(command, &session_prompt, deadline, timeout)
            .await?;

        Ok(InteractiveResult {
            command: command.to_string(),
            steps,
            exit_code: Some(exit_code),
            elapsed: start.elapsed(),
        })
    }

    /// Close the channel. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.buffer.clear();
        match self.shell.take() {
            Some(mut shell) => {
                info!("[{}] closing session", self.config.name);
                shell.close().await
            }
            None => Ok(()),
        }
    }

    /// Run `line`, answering each challenge at most once.
    pub(super) async fn send_with_challenges(
        &mut self,
        line: &str,
        mut challenges: Vec<Challenge>,
        opts: &SendOptions,
    ) -> Result<CommandResult> {
        let start = Instant::now();
        let deadline = start + opts.timeout;
        self.prepare().await?;

        debug!("[{}] send: {}", self.config.name, line);
        self.write_line(line).await?;

        let prompt = opts
            .expect_prompt
            .clone()
            .unwrap_or_else(|| self.prompt.clone());
        let mut patterns = vec![prompt.clone()];
        patterns.extend(challenges.iter().map(|c| c.pattern.clone()));
        let patterns: Vec<&Regex> = patterns.iter().collect();

        let mut captured = Vec::new();
        let mut after_answer = false;
        loop {
            let (idx, read) = match self.read_until(&patterns, deadline, line, opts.timeout).await {
                Ok(found) => found,
                Err(e) => return Err(self.abandon(e).await),
            };
            let mut raw = read.as_slice();
            if after_answer {
                // The newline printed once the answer is entered.
                raw = raw
                    .strip_prefix(b"\r\n")
                    .or_else(|| raw.strip_prefix(b"\n"))
                    .unwrap_or(raw);
                after_answer = false;
            }
            if idx == 0 {
                captured.extend_from_slice(raw);
                break;
            }

            // Drop the line holding the question; everything before it is output.
            let challenge = &mut challenges[idx - 1];
            let question = challenge
                .pattern
                .find_iter(raw)
                .last()
                .map_or(raw.len(), |m| m.start());
            let line_start = raw[..question]
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(0, |p| p + 1);
            captured.extend_from_slice(&raw[..line_start]);

            let answer = match (&challenge.answer, challenge.answered) {
                (Some(answer), false) => answer.clone(),
                _ => {
                    let err = challenge.rejection.take().unwrap_or(SessionError::Closed);
                    warn!("[{}] '{}': {}", self.config.name, line, err);
                    if let Err(e) = self.recover().await {
                        debug!("[{}] prompt not regained: {}", self.config.name, e);
                        self.mark_closed().await;
                    }
                    return Err(err.into());
                }
            };
            challenge.answered = true;
            debug!("[{}] answering challenge (hidden)", self.config.name);
            self.write_line(answer.expose_secret()).await?;
            after_answer = true;
        }

        let (lines, prompt_text) = normalize(&captured, line);
        self.finish(line, lines, prompt_text, opts, &prompt, deadline, start)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &mut self,
        command: &str,
        lines: Vec<String>,
        prompt_text: String,
        opts: &SendOptions,
        prompt: &Regex,
        deadline: Instant,
        start: Instant,
    ) -> Result<CommandResult> {
        let exit_code = if opts.get_exit_code {
            Some(
                self.query_exit_code(command, prompt, deadline, opts.timeout)
                    .await?,
            )
        } else {
            self.state = SessionState::Idle;
            None
        };

        trace!(
            "[{}] '{}' -> {:?}, {} lines",
            self.config.name,
            command,
            exit_code,
            lines.len()
        );

        Ok(CommandResult {
            command: command.to_string(),
            exit_code,
            lines,
            prompt: prompt_text,
            elapsed: start.elapsed(),
        })
    }

    async fn query_exit_code(
        &mut self,
        command: &str,
        prompt: &Regex,
        deadline: Instant,
        budget: Duration,
    ) -> Result<i32> {
        self.buffer.clear();
        self.write_line(EXIT_CODE_QUERY).await?;
        let raw = match self.read_until(&[prompt], deadline, command, budget).await {
            Ok((_, raw)) => raw,
            Err(e) => return Err(self.abandon(e).await),
        };
        self.state = SessionState::Idle;

        let (lines, _) = normalize(&raw, EXIT_CODE_QUERY);
        let code = parse_exit_code(lines.iter().map(String::as_str)).ok_or_else(|| {
            SessionError::ExitCodeUnavailable {
                command: command.to_string(),
            }
        })?;
        self.last_exit_code = Some(code);
        Ok(code)
    }

    /// Bring the session to a known-idle prompt before writing a command.
    async fn prepare(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => return Err(self.not_connected()),
            SessionState::InCommand | SessionState::AwaitingPromptRestore => {
                warn!(
                    "[{}] session not at its prompt ({:?}), resynchronizing",
                    self.config.name, self.state
                );
                if let Err(e) = self.recover().await {
                    warn!("[{}] resync failed: {}", self.config.name, e);
                    self.mark_closed().await;
                    return Err(SessionError::Closed.into());
                }
            }
            SessionState::Idle => {}
        }

        if !self.shell.as_ref().is_some_and(|s| s.is_alive()) {
            self.mark_closed().await;
            return Err(SessionError::Closed.into());
        }

        self.buffer.clear();
        Ok(())
    }

    /// Interrupt whatever runs and wait for the prompt, then let output settle.
    async fn recover(&mut self) -> Result<()> {
        let budget = self.config.recovery_timeout;
        let deadline = Instant::now() + budget;
        self.buffer.clear();
        self.write_raw(INTERRUPT).await?;

        let prompt = self.prompt.clone();
        self.read_until(&[&prompt], deadline, "<interrupt>", budget)
            .await?;
        self.drain(deadline).await?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Discard output until the channel stays quiet for [`DRAIN_QUIET`].
    async fn drain(&mut self, deadline: Instant) -> Result<()> {
        loop {
            let quiet = (Instant::now() + DRAIN_QUIET).min(deadline);
            let Some(shell) = self.shell.as_mut() else {
                return Err(self.not_connected());
            };
            match tokio::time::timeout_at(quiet, shell.read()).await {
                Err(_) => break,
                Ok(Ok(Some(chunk))) => {
                    trace!("[{}] drained {} bytes", self.config.name, chunk.len());
                }
                Ok(Ok(None)) => return Err(SessionError::Closed.into()),
                Ok(Err(e)) => return Err(e),
            }
        }
        self.buffer.clear();
        Ok(())
    }

    /// Handle a failed read: regain the prompt after a timeout, else close.
    async fn abandon(&mut self, err: Error) -> Error {
        if let Error::Session(SessionError::Timeout { command, timeout }) = &err {
            warn!(
                "[{}] '{}' did not finish within {:?}, interrupting",
                self.config.name, command, timeout
            );
            if let Err(e) = self.recover().await {
                warn!("[{}] prompt not regained: {}", self.config.name, e);
                self.mark_closed().await;
            }
        } else {
            warn!("[{}] closing session after error: {}", self.config.name, err);
            self.mark_closed().await;
        }
        err
    }

    /// Read until one of `patterns` matches the buffer tail.
    ///
    /// Returns the index of the matching pattern and everything read up to
    /// the end of its match.
    async fn read_until(
        &mut self,
        patterns: &[&Regex],
        deadline: Instant,
        command: &str,
        budget: Duration,
    ) -> Result<(usize, Vec<u8>)> {
        loop {
            if let Some((idx, found)) = self.buffer.find_tail_any(patterns) {
                return Ok((idx, self.buffer.take_through(found.end)));
            }

            let Some(shell) = self.shell.as_mut() else {
                return Err(self.not_connected());
            };
            match tokio::time::timeout_at(deadline, shell.read()).await {
                Err(_) => {
                    return Err(SessionError::Timeout {
                        command: command.to_string(),
                        timeout: budget,
                    }
                    .into());
                }
                Ok(Ok(Some(chunk))) => {
                    trace!("[{}] read {} bytes", self.config.name, chunk.len());
                    self.buffer.extend(&chunk);
                }
                Ok(Ok(None)) => return Err(SessionError::Closed.into()),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.state = SessionState::InCommand;
        self.write_raw(format!("{line}\n").as_bytes()).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let Some(shell) = self.shell.as_mut() else {
            return Err(self.not_connected());
        };
        if let Err(e) = shell.write(data).await {
            self.mark_closed().await;
            return Err(e);
        }
        Ok(())
    }

    async fn mark_closed(&mut self) {
        if let Err(e) = self.close().await {
            debug!("[{}] error while closing: {}", self.config.name, e);
        }
    }

    fn not_connected(&self) -> Error {
        SessionError::NotConnected {
            name: self.config.name.clone(),
        }
        .into()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.config.name)
            .field("host", &self.config.ssh.host)
            .field("username", &self.config.ssh.username)
            .field("prompt", &self.prompt_source)
            .field("state", &self.state)
            .finish()
    }
}

/// Drop the `^C` the terminal echoes for an interrupt.
fn strip_interrupt_echo(lines: &mut Vec<String>) {
    if let Some(last) = lines.last_mut()
        && let Some(stripped) = last.strip_suffix("^C")
    {
        *last = stripped.to_string();
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
}
