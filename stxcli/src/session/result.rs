//! Send options and command results.

use std::time::Duration;

use regex::bytes::Regex;

use crate::channel::compile_prompt_pattern;
use crate::error::{Result, SessionError};

/// Options for a single [`Session::send`](super::Session::send).
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Overall budget for the command, including the exit-code query.
    pub timeout: Duration,

    /// Prompt to wait for instead of the session prompt.
    pub expect_prompt: Option<Regex>,

    /// Query `echo $?` after the command (default: true).
    pub get_exit_code: bool,
}

impl SendOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            expect_prompt: None,
            get_exit_code: true,
        }
    }

    /// Wait for `pattern` instead of the session prompt.
    pub fn expect_prompt(mut self, pattern: &str) -> Result<Self> {
        let regex = compile_prompt_pattern(pattern).map_err(SessionError::InvalidPrompt)?;
        self.expect_prompt = Some(regex);
        Ok(self)
    }

    /// Skip the exit-code query.
    pub fn without_exit_code(mut self) -> Self {
        self.get_exit_code = false;
        self
    }
}

/// Output of one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The command line as written to the shell.
    pub command: String,

    /// Exit status from `echo $?`, `None` when not queried.
    pub exit_code: Option<i32>,

    /// Output lines: echo, trailing prompt and trailing blank lines removed.
    pub lines: Vec<String>,

    /// The prompt text that ended the command.
    pub prompt: String,

    /// Time taken, including the exit-code query.
    pub elapsed: Duration,
}

impl CommandResult {
    /// The exit status, or `-1` when it was not queried.
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The output joined back into one string.
    pub fn output(&self) -> String {
        self.lines.join("\n")
    }

    /// Check if any output line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.output())
    }
}

/// Turn the raw bytes read for `command` into output lines and the prompt.
///
/// Removes carriage returns, the echoed command line and the trailing
/// prompt line, then any trailing blank lines.
pub(crate) fn normalize(raw: &[u8], command: &str) -> (Vec<String>, String) {
    let text = String::from_utf8_lossy(raw).replace('\r', "");
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();

    let prompt = lines.pop().unwrap_or_default().trim_end().to_string();

    let command = command.trim();
    if !command.is_empty()
        && lines
            .first()
            .is_some_and(|first| first.trim_end().ends_with(command))
    {
        lines.remove(0);
    }

    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    (lines, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_echo_and_prompt() {
        let raw = b"system host-list\r\n+----+\r\n| id |\r\n+----+\r\n\r\nsysadmin@controller-0:~$ ";
        let (lines, prompt) = normalize(raw, "system host-list");
        assert_eq!(lines, vec!["+----+", "| id |", "+----+"]);
        assert_eq!(prompt, "sysadmin@controller-0:~$");
    }

    #[test]
    fn test_normalize_keeps_output_without_echo() {
        let raw = b"first\nsecond\nprompt$ ";
        let (lines, _) = normalize(raw, "other");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_normalize_empty_output() {
        let (lines, prompt) = normalize(b"true\r\nhost$ ", "true");
        assert!(lines.is_empty());
        assert_eq!(prompt, "host$");
    }

    #[test]
    fn test_code_defaults_when_not_queried() {
        let result = CommandResult {
            command: "ls".into(),
            exit_code: None,
            lines: vec![],
            prompt: String::new(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(result.code(), -1);
        assert!(!result.is_success());
    }

    #[test]
    fn test_options_keep_caller_timeout() {
        let opts = SendOptions::new(Duration::from_secs(7)).without_exit_code();
        assert_eq!(opts.timeout, Duration::from_secs(7));
        assert!(!opts.get_exit_code);
        assert!(opts.expect_prompt.is_none());
    }
}
