//! In-memory shell used by unit tests.
//!
//! Behaves like a bash login shell on a PTY: echoes each line, prints the
//! prompt when a command finishes, answers `echo $?`, challenges `sudo`
//! for a password and handles Ctrl-C.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::config::SshConfig;
use super::shell::{Connector, ShellChannel};
use crate::error::{Result, TransportError};

pub(crate) const PROMPT: &str = "sysadmin@controller-0:~$ ";

/// What the scripted host does with one command line.
pub(crate) enum Reply {
    /// Print output, finish with an exit code and optionally switch prompt.
    Done {
        output: String,
        code: i32,
        prompt: Option<String>,
    },
    /// Print output, then never finish until interrupted.
    Hang(String),
    /// Print a question and hand the next input line to `then`.
    Ask {
        question: String,
        then: Box<dyn FnOnce(&str) -> Reply + Send>,
    },
    /// Drop the connection.
    Disconnect,
}

impl Reply {
    pub(crate) fn ok(output: impl Into<String>) -> Self {
        Reply::Done {
            output: output.into(),
            code: 0,
            prompt: None,
        }
    }

    pub(crate) fn code(output: impl Into<String>, code: i32) -> Self {
        Reply::Done {
            output: output.into(),
            code,
            prompt: None,
        }
    }

    pub(crate) fn ask(
        question: impl Into<String>,
        then: impl FnOnce(&str) -> Reply + Send + 'static,
    ) -> Self {
        Reply::Ask {
            question: question.into(),
            then: Box::new(then),
        }
    }

    pub(crate) fn switch_prompt(output: impl Into<String>, prompt: impl Into<String>) -> Self {
        Reply::Done {
            output: output.into(),
            code: 0,
            prompt: Some(prompt.into()),
        }
    }
}

type Handler = Box<dyn FnMut(&str) -> Reply + Send>;

/// Lines received by a [`ScriptedShell`], shared with the test.
#[derive(Clone, Default)]
pub(crate) struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, line: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|l| *l == line).count()
    }

    fn push(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

pub(crate) struct ScriptedShell {
    prompt: String,
    handler: Handler,
    pending: VecDeque<Bytes>,
    line: Vec<u8>,
    last_code: i32,
    sudo_password: Option<String>,
    awaiting_password: Option<String>,
    awaiting_answer: Option<Box<dyn FnOnce(&str) -> Reply + Send>>,
    hanging: bool,
    closed: bool,
    latency: Duration,
    log: CommandLog,
}

impl ScriptedShell {
    pub(crate) fn new(handler: impl FnMut(&str) -> Reply + Send + 'static) -> (Self, CommandLog) {
        let log = CommandLog::default();
        let mut shell = Self {
            prompt: PROMPT.to_string(),
            handler: Box::new(handler),
            pending: VecDeque::new(),
            line: Vec::new(),
            last_code: 0,
            sudo_password: None,
            awaiting_password: None,
            awaiting_answer: None,
            hanging: false,
            closed: false,
            latency: Duration::ZERO,
            log: log.clone(),
        };
        shell.emit("Last login: Tue Oct 13 09:12:44 2026 from 10.10.10.1\r\n");
        shell.emit_prompt();
        (shell, log)
    }

    /// Delay every chunk handed to the reader by `latency`.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Require `password` for `sudo` commands.
    pub(crate) fn with_sudo_password(mut self, password: &str) -> Self {
        self.sudo_password = Some(password.to_string());
        self
    }

    fn emit(&mut self, text: &str) {
        self.pending
            .push_back(Bytes::from(text.replace('\n', "\r\n").replace("\r\r\n", "\r\n")));
    }

    fn emit_prompt(&mut self) {
        let prompt = self.prompt.clone();
        self.pending.push_back(Bytes::from(prompt));
    }

    fn emit_output(&mut self, output: &str) {
        if !output.is_empty() {
            let mut text = output.to_string();
            if !text.ends_with('\n') {
                text.push('\n');
            }
            self.emit(&text);
        }
    }

    fn run(&mut self, line: &str) {
        let reply = (self.handler)(line);
        self.apply(reply);
    }

    fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::Done {
                output,
                code,
                prompt,
            } => {
                self.emit_output(&output);
                self.last_code = code;
                if let Some(prompt) = prompt {
                    self.prompt = prompt;
                }
                self.emit_prompt();
            }
            Reply::Hang(output) => {
                self.emit_output(&output);
                self.hanging = true;
            }
            Reply::Ask { question, then } => {
                self.emit(&question);
                self.awaiting_answer = Some(then);
            }
            Reply::Disconnect => self.closed = true,
        }
    }

    fn handle_line(&mut self, line: String) {
        if let Some(command) = self.awaiting_password.take() {
            self.emit("\n");
            if Some(line.as_str()) == self.sudo_password.as_deref() {
                self.run(&command);
            } else {
                self.emit("Sorry, try again.\n[sudo] password for sysadmin: ");
                self.awaiting_password = Some(command);
            }
            return;
        }

        self.emit(&format!("{line}\n"));

        if let Some(then) = self.awaiting_answer.take() {
            let reply = then(&line);
            self.apply(reply);
            return;
        }

        self.log.push(&line);

        if line == "echo $?" {
            let code = self.last_code;
            self.emit(&format!("{code}\n"));
            self.emit_prompt();
        } else if let Some(command) = line.strip_prefix("sudo ") {
            if self.sudo_password.is_some() {
                self.emit("[sudo] password for sysadmin: ");
                self.awaiting_password = Some(command.to_string());
            } else {
                let command = command.to_string();
                self.run(&command);
            }
        } else {
            self.run(&line);
        }
    }

    fn interrupt(&mut self) {
        self.line.clear();
        self.awaiting_password = None;
        self.awaiting_answer = None;
        if self.hanging {
            self.hanging = false;
            self.last_code = 130;
        }
        self.emit("^C\n");
        self.emit_prompt();
    }
}

#[async_trait]
impl ShellChannel for ScriptedShell {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        for &byte in data {
            match byte {
                0x03 => self.interrupt(),
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    if !self.hanging {
                        self.handle_line(line);
                    }
                }
                b'\r' => {}
                other => self.line.push(other),
            }
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        // Sleep before taking the chunk so a cancelled read loses nothing.
        if !self.pending.is_empty() && !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.closed {
            return Ok(None);
        }
        std::future::pending::<()>().await;
        Ok(None)
    }

    fn is_alive(&self) -> bool {
        !self.closed
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

type ShellFactory = Box<dyn Fn(&SshConfig) -> ScriptedShell + Send + Sync>;

/// Connector handing out scripted shells, counting connections per host.
pub(crate) struct ScriptedConnector {
    factory: ShellFactory,
    opened: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new(factory: impl Fn(&SshConfig) -> ScriptedShell + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn opened(&self) -> Arc<AtomicUsize> {
        self.opened.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn ShellChannel>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new((self.factory)(config)))
    }
}
