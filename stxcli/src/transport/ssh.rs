//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::shell::{Connector, ShellChannel};
use crate::error::{Result, TransportError};

/// One authenticated russh connection.
pub struct SshTransport {
    session: Handle<SshHandler>,
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: config.keepalive_interval,
            ..Default::default()
        });

        let rejection = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            known_hosts: KnownHosts {
                host: config.host.clone(),
                port: config.port,
                path: config.known_hosts_path.clone(),
            },
            verification: config.host_key_verification.clone(),
            rejection: rejection.clone(),
        };

        debug!("connecting to {}", config.socket_addr());
        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
            match (rejected, e) {
                (Some(reason), _) => reason,
                (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                },
                (None, e) => TransportError::Ssh(e),
            }
        })?;

        Self::authenticate(&mut session, &config).await?;

        Ok(Self { session, config })
    }

    /// Open a PTY channel running the login shell.
    pub async fn open_shell_channel(&self) -> Result<Channel<Msg>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(channel)
    }

    /// Open the login shell and hand over the connection to it.
    pub async fn into_shell(self) -> Result<RusshShell> {
        let channel = self.open_shell_channel().await?;
        Ok(RusshShell {
            channel,
            transport: Some(self),
        })
    }

    /// Check whether the background session task is still running.
    pub fn is_alive(&self) -> bool {
        !self.session.is_closed()
    }

    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// Interactive login shell over a russh PTY channel.
pub struct RusshShell {
    channel: Channel<Msg>,
    transport: Option<SshTransport>,
}

#[async_trait]
impl ShellChannel for RusshShell {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(Bytes::copy_from_slice(&data))),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(Some(Bytes::copy_from_slice(&data)));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("login shell exited with status {}", exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(None),
                Some(_) => {}
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.transport.as_ref().is_some_and(SshTransport::is_alive)
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.channel.eof().await;
        if let Some(transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }
}

/// Opens sessions over real SSH connections.
#[derive(Debug, Default, Clone)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn ShellChannel>> {
        let transport = SshTransport::connect(config.clone()).await?;
        Ok(Box::new(transport.into_shell().await?))
    }
}

/// known_hosts lookups for one endpoint.
struct KnownHosts {
    host: String,
    port: u16,
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// `Ok(false)` when the host has no entry yet.
    fn check(&self, key: &PublicKey) -> std::result::Result<bool, TransportError> {
        let found = match &self.path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };
        found.map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            other => TransportError::KnownHosts(other.to_string()),
        })
    }

    fn learn(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        let learned = match &self.path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key),
        };
        learned.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn unknown(&self) -> TransportError {
        TransportError::HostKeyUnknown {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// russh client handler; only verifies the server key.
struct SshHandler {
    known_hosts: KnownHosts,
    verification: HostKeyVerification,
    /// Why the key was rejected, read back by `connect` in place of the
    /// generic `russh::Error::UnknownKey`.
    rejection: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    fn verdict(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        match self.verification {
            HostKeyVerification::Disabled => Ok(()),
            HostKeyVerification::Strict => match self.known_hosts.check(key)? {
                true => Ok(()),
                false => Err(self.known_hosts.unknown()),
            },
            HostKeyVerification::AcceptNew => {
                if !self.known_hosts.check(key)? {
                    debug!(
                        "learning host key for {}:{}",
                        self.known_hosts.host, self.known_hosts.port
                    );
                    if let Err(e) = self.known_hosts.learn(key) {
                        warn!("Failed to save host key: {}", e);
                    }
                }
                Ok(())
            }
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.verdict(server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("rejecting host key: {}", e);
                if let Ok(mut slot) = self.rejection.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}
