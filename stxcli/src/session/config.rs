//! Session configuration and its builder.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channel::{DEFAULT_PROMPT, DEFAULT_SEARCH_DEPTH, compile_prompt_pattern};
use crate::error::{Result, SessionError};
use crate::transport::{AuthMethod, HostKeyVerification, SshConfig};

/// Everything needed to open and drive one interactive session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Symbolic name used in log records (e.g. `active-controller`).
    pub name: String,

    /// SSH endpoint and credentials.
    pub ssh: SshConfig,

    /// Prompt regex the login shell shows once ready.
    pub prompt: String,

    /// How many trailing bytes are searched for the prompt.
    pub search_depth: usize,

    /// Commands run right after the first prompt (e.g. `export TMOUT=0`).
    pub on_open_commands: Vec<String>,

    /// Password answered to sudo challenges. Defaults to the login password.
    pub sudo_password: Option<SecretString>,

    /// Time allowed to regain the prompt after an interrupt.
    pub recovery_timeout: Duration,
}

impl SessionConfig {
    /// Start building a configuration for `host`.
    pub fn builder(host: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(host)
    }

    /// `(host, username)`, the identity of sessions opened from this config.
    pub fn identity(&self) -> (&str, &str) {
        (&self.ssh.host, &self.ssh.username)
    }

    /// The password used for sudo challenges, if any.
    pub fn effective_sudo_password(&self) -> Option<&SecretString> {
        self.sudo_password.as_ref().or_else(|| self.ssh.password())
    }
}

/// Builder for [`SessionConfig`].
///
/// # Example
///
/// ```rust
/// use stxcli::session::SessionConfig;
///
/// # fn example() -> Result<(), stxcli::Error> {
/// let config = SessionConfig::builder("10.10.10.2")
///     .name("active-controller")
///     .username("sysadmin")
///     .password("secret")
///     .prompt(r"controller-[01]:~\$")
///     .on_open_command("export TMOUT=0")
///     .build()?;
/// assert_eq!(config.ssh.port, 22);
/// # Ok(())
/// # }
/// ```
pub struct SessionConfigBuilder {
    name: Option<String>,
    username: Option<String>,
    ssh: SshConfig,
    prompt: String,
    search_depth: usize,
    on_open_commands: Vec<String>,
    sudo_password: Option<SecretString>,
    recovery_timeout: Duration,
}

impl SessionConfigBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: None,
            username: None,
            ssh: SshConfig::new(host, String::new(), AuthMethod::None),
            prompt: DEFAULT_PROMPT.to_string(),
            search_depth: DEFAULT_SEARCH_DEPTH,
            on_open_commands: Vec::new(),
            sudo_password: None,
            recovery_timeout: Duration::from_secs(10),
        }
    }

    /// Set the name used in log records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ssh.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Log in with a password, also used for `sudo` unless
    /// [`sudo_password`](Self::sudo_password) is set.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.ssh.auth = AuthMethod::password(password);
        self
    }

    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.ssh.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.ssh.auth = auth;
        self
    }

    /// Set the initial prompt regex.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the connection timeout (also bounds the wait for the first prompt).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.ssh.timeout = timeout;
        self
    }

    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.ssh.terminal_width = width;
        self.ssh.terminal_height = height;
        self
    }

    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.ssh.host_key_verification = mode;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh.known_hosts_path = Some(path.into());
        self
    }

    /// `None` disables SSH keepalives.
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.ssh.keepalive_interval = interval;
        self
    }

    /// Set how many trailing bytes are searched for the prompt.
    pub fn search_depth(mut self, depth: usize) -> Self {
        self.search_depth = depth;
        self
    }

    /// Add a command run right after login.
    pub fn on_open_command(mut self, command: impl Into<String>) -> Self {
        self.on_open_commands.push(command.into());
        self
    }

    /// Set the sudo password when it differs from the login password.
    pub fn sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = Some(SecretString::from(password.into()));
        self
    }

    /// Set the time allowed to regain the prompt after an interrupt.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Build the configuration, validating the username and prompt.
    pub fn build(self) -> Result<SessionConfig> {
        let mut ssh = self.ssh;
        ssh.username = self.username.ok_or_else(|| SessionError::InvalidConfig {
            message: format!("no username configured for {}", ssh.host),
        })?;

        compile_prompt_pattern(&self.prompt).map_err(SessionError::InvalidPrompt)?;

        Ok(SessionConfig {
            name: self.name.unwrap_or_else(|| ssh.host.clone()),
            ssh,
            prompt: self.prompt,
            search_depth: self.search_depth,
            on_open_commands: self.on_open_commands,
            sudo_password: self.sudo_password,
            recovery_timeout: self.recovery_timeout,
        })
    }
}
