//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// How server host keys are checked, like OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyVerification {
    /// Only hosts already in known_hosts are accepted.
    Strict,

    /// Unknown hosts are learned; a changed key is still rejected.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. Lab hosts are frequently
    /// reinstalled, so harness inventories often pick this.
    Disabled,
}

/// Endpoint, credentials and PTY settings for one SSH login.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Address or hostname, e.g. the OAM floating address.
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,

    /// Bounds the TCP connect and the SSH handshake.
    pub timeout: Duration,

    /// PTY columns. Wide enough that `system` tables are not wrapped by
    /// the terminal.
    pub terminal_width: u32,
    pub terminal_height: u32,

    pub host_key_verification: HostKeyVerification,

    /// known_hosts file; `~/.ssh/known_hosts` when unset.
    pub known_hosts_path: Option<PathBuf>,

    /// SSH keepalive period. Long `system application-apply` waits sit
    /// idle at the prompt, and lab firewalls drop idle flows.
    pub keepalive_interval: Option<Duration>,
}

impl SshConfig {
    /// Create a configuration with defaults for everything but the endpoint.
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            timeout: Duration::from_secs(30),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            keepalive_interval: Some(Duration::from_secs(15)),
        }
    }

    /// `host:port`, for log records.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The password, if password authentication is configured.
    pub fn password(&self) -> Option<&SecretString> {
        match &self.auth {
            AuthMethod::Password(password) => Some(password),
            _ => None,
        }
    }
}

/// How the user logs in.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `none` method; only useful against test servers.
    None,
    Password(SecretString),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl AuthMethod {
    /// Password authentication from a plain string.
    pub fn password(password: impl Into<String>) -> Self {
        AuthMethod::Password(SecretString::from(password.into()))
    }
}
