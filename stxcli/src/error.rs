//! Error types for stxcli.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for stxcli operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Interactive session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Dispatched command errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Malformed ASCII table
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Table filter/projection errors
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Status tracker errors
    #[error("Tracker error: {0}")]
    Track(#[from] TrackError),

    /// Cleanup release errors
    #[error("Cleanup error: {0}")]
    Cleanup(#[from] CleanupError),

    /// Session registry / inventory errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts (strict verification)
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key does not match the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session layer errors (prompt detection, sudo, file transfer).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not open
    #[error("Session '{name}' is not connected")]
    NotConnected { name: String },

    /// Prompt not seen before the deadline
    #[error("Prompt not found within {timeout:?} while running '{command}'")]
    Timeout { command: String, timeout: Duration },

    /// sudo challenged a second time
    #[error("sudo rejected the password for '{user}'")]
    SudoAuthFailed { user: String },

    /// sudo asked for a password but none is configured
    #[error("sudo asked for a password but none is configured for '{user}'")]
    NoSudoPassword { user: String },

    /// `echo $?` did not produce an integer line
    #[error("Could not read the exit code of '{command}'")]
    ExitCodeUnavailable { command: String },

    /// Session configuration is incomplete
    #[error("Invalid session configuration: {message}")]
    InvalidConfig { message: String },

    /// Invalid prompt regex
    #[error("Invalid prompt pattern: {0}")]
    InvalidPrompt(#[from] regex::Error),

    /// The shell channel closed while reading
    #[error("Shell channel closed")]
    Closed,

    /// Upload or copy failed
    #[error("Transfer of '{path}' failed: {message}")]
    Transfer { path: String, message: String },
}

/// Dispatcher errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Non-zero exit code with `expect_nonzero_ok = false`
    #[error("'{command}' exited with code {exit_code}")]
    Failed {
        command: String,
        exit_code: i32,
        output: Vec<String>,
    },
}

/// Table parsing errors. Never retriable.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Structural problem at a given line of the table
    #[error("Malformed table at line {line}: {reason}")]
    Malformed { reason: String, line: usize },

    /// Fewer physical lines than the smallest valid table
    #[error("Table needs at least {min} lines, found {found}")]
    TooShort { min: usize, found: usize },

    /// Header labels missing or wrong
    #[error("Table header must contain '{expected}', found '{found}'")]
    BadHeader { expected: String, found: String },

    /// No table at all in the input
    #[error("No table found in output")]
    NoTable,
}

/// Filter and projection errors.
#[derive(Error, Debug)]
pub enum TableError {
    /// Column not present in the table header
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// Key occurs in more than one row with `unique = true`
    #[error("Duplicate key '{key}' in column '{column}'")]
    DuplicateKey { column: String, key: String },

    /// Filter value is not a valid regex
    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Structured literal could not be decoded
    #[error("Cannot decode literal '{value}': {reason}")]
    Literal { value: String, reason: String },
}

/// Status tracker errors.
#[derive(Error, Debug)]
pub enum TrackError {
    /// Probe returned a value from the failure set
    #[error("{description}: reached terminal failure state '{observed}'")]
    FailedTerminal {
        description: String,
        observed: String,
    },

    /// Deadline elapsed without reaching an expected value
    #[error("{description}: timed out after {elapsed:?} (last observed: {last:?})")]
    TimedOut {
        description: String,
        elapsed: Duration,
        last: Option<String>,
    },

    /// Surrounding context was cancelled
    #[error("{description}: cancelled")]
    Cancelled { description: String },
}

/// Cleanup release errors.
#[derive(Error, Debug)]
pub enum CleanupError {
    /// One or more deleters failed; every entry was still attempted
    #[error("{} of {attempted} cleanup entries failed in scope '{scope}'", failures.len())]
    Partial {
        scope: String,
        attempted: usize,
        failures: Vec<CleanupFailure>,
    },
}

/// A single failed cleanup entry.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    /// Resource kind label.
    pub kind: String,

    /// Resource identifier.
    pub id: String,

    /// Rendered error message.
    pub message: String,
}

/// Registry and inventory errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Inventory has no entry for the name
    #[error("Inventory has no host for '{0}'")]
    UnknownName(String),

    /// Symbolic name could not be parsed
    #[error("Invalid session name '{0}'")]
    InvalidName(String),

    /// Credential profile is not defined
    #[error("Unknown credential profile '{0}'")]
    UnknownProfile(String),

    /// Inventory document could not be loaded
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// The platform did not report which controller is active
    #[error("Cannot determine the active controller: {0}")]
    NoActiveController(String),
}

/// Error kinds callers branch on, independent of the layer that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectError,
    AuthError,
    Timeout,
    CommandFailed,
    ParseError,
    DuplicateKey,
    TrackerFailedTerminal,
    CleanupPartial,
    Cancelled,
    Other,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(e) => match e {
                TransportError::AuthenticationFailed { .. } | TransportError::Key(_) => {
                    ErrorKind::AuthError
                }
                TransportError::Timeout(_) => ErrorKind::Timeout,
                _ => ErrorKind::ConnectError,
            },
            Error::Session(e) => match e {
                SessionError::Timeout { .. } => ErrorKind::Timeout,
                SessionError::SudoAuthFailed { .. } | SessionError::NoSudoPassword { .. } => {
                    ErrorKind::AuthError
                }
                SessionError::Closed | SessionError::NotConnected { .. } => {
                    ErrorKind::ConnectError
                }
                _ => ErrorKind::Other,
            },
            Error::Command(_) => ErrorKind::CommandFailed,
            Error::Parse(_) => ErrorKind::ParseError,
            Error::Table(TableError::DuplicateKey { .. }) => ErrorKind::DuplicateKey,
            Error::Table(_) => ErrorKind::Other,
            Error::Track(e) => match e {
                TrackError::FailedTerminal { .. } => ErrorKind::TrackerFailedTerminal,
                TrackError::TimedOut { .. } => ErrorKind::Timeout,
                TrackError::Cancelled { .. } => ErrorKind::Cancelled,
            },
            Error::Cleanup(_) => ErrorKind::CleanupPartial,
            Error::Registry(_) => ErrorKind::Other,
        }
    }

    /// Whether the failure dropped the transport, so one re-open is worth trying.
    ///
    /// Authentication and host key failures also close the session but
    /// would fail the same way again.
    pub fn warrants_reopen(&self) -> bool {
        match self {
            Error::Transport(e) => !matches!(
                e,
                TransportError::AuthenticationFailed { .. }
                    | TransportError::Key(_)
                    | TransportError::HostKeyUnknown { .. }
                    | TransportError::HostKeyChanged { .. }
            ),
            Error::Session(e) => matches!(e, SessionError::Closed | SessionError::NotConnected { .. }),
            _ => false,
        }
    }
}

/// Result type alias using stxcli's Error.
pub type Result<T> = std::result::Result<T, Error>;
