//! Symbolic name to session mapping.
//!
//! The [`SessionRegistry`] owns every session a test flow uses. Sessions
//! are opened on first use and reused afterwards; a send that fails
//! because the connection dropped re-opens the session and is retried
//! once.

mod inventory;
mod locks;
mod name;

pub use inventory::{HostEntry, Inventory, StaticInventory};
pub use locks::UploadLocks;
pub use name::SessionName;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::dispatch::{CommandTarget, Dispatcher, Invocation};
use crate::error::{CommandError, RegistryError, Result};
use crate::session::{CommandResult, SendOptions, Session, SessionConfig};
use crate::transport::{Connector, SshConnector};

/// Sessions by symbolic name.
pub struct SessionRegistry {
    inventory: Arc<dyn Inventory>,
    connector: Arc<dyn Connector>,
    sessions: IndexMap<SessionName, Session>,
    active_host: Option<String>,
    upload_locks: Arc<UploadLocks>,
}

impl SessionRegistry {
    pub fn new(inventory: Arc<dyn Inventory>, connector: Arc<dyn Connector>) -> Self {
        Self {
            inventory,
            connector,
            sessions: IndexMap::new(),
            active_host: None,
            upload_locks: UploadLocks::shared(),
        }
    }

    /// A registry connecting over SSH.
    pub fn ssh(inventory: Arc<dyn Inventory>) -> Self {
        Self::new(inventory, Arc::new(SshConnector))
    }

    /// Use `locks` instead of the process-wide upload locks.
    pub fn with_upload_locks(mut self, locks: Arc<UploadLocks>) -> Self {
        self.upload_locks = locks;
        self
    }

    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.inventory
    }

    /// A dispatcher resolving credential profiles through this registry's
    /// inventory.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inventory.clone())
    }

    /// Hostname of the active controller, once
    /// [`refresh_active_controller`](Self::refresh_active_controller) ran.
    pub fn active_host(&self) -> Option<&str> {
        self.active_host.as_deref()
    }

    /// Whether an open session is cached for `name`.
    pub fn is_cached(&self, name: &SessionName) -> bool {
        self.sessions.get(name).is_some_and(Session::is_open)
    }

    /// The session for `name`, opened if it is not cached or has closed.
    pub async fn session(&mut self, name: &SessionName) -> Result<&mut Session> {
        if !self.is_cached(name) {
            self.discard(name).await;
            let config = self.config_for(name)?;
            info!("[{}] opening session to {}", name, config.ssh.socket_addr());
            let session = Session::open(config, self.connector.as_ref()).await?;
            self.sessions.insert(name.clone(), session);
        }
        self.sessions
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()).into())
    }

    /// Run `command` on the session for `name`.
    ///
    /// If the session turns out to be dropped (or cannot be opened), it
    /// is re-opened and the command retried once. Timeouts and
    /// authentication failures are returned as they are.
    pub async fn send(&mut self, name: &SessionName, command: &str, opts: &SendOptions) -> Result<CommandResult> {
        self.send_with_reopen(name, command, opts, false).await
    }

    /// [`send`](Self::send) through `sudo`.
    pub async fn send_sudo(
        &mut self,
        name: &SessionName,
        command: &str,
        opts: &SendOptions,
    ) -> Result<CommandResult> {
        self.send_with_reopen(name, command, opts, true).await
    }

    /// Dispatch `invocation` on the session for `name`.
    pub async fn run(&mut self, name: &SessionName, invocation: &Invocation) -> Result<CommandResult> {
        let dispatcher = self.dispatcher();
        dispatcher.run(invocation, &mut self.target(name.clone())).await
    }

    /// A [`CommandTarget`] sending through this registry under `name`.
    pub fn target(&mut self, name: SessionName) -> RegistryTarget<'_> {
        RegistryTarget {
            registry: self,
            name,
        }
    }

    /// Upload `local` to `remote` on the host behind `name`.
    ///
    /// Uploads of the same path to the same host are serialized across
    /// registries sharing the upload locks.
    pub async fn upload(&mut self, name: &SessionName, local: &Path, remote: &str, timeout: Duration) -> Result<()> {
        let locks = self.upload_locks.clone();
        let session = self.session(name).await?;
        let host = session.config().ssh.host.clone();
        let _guard = locks.acquire(&host, remote).await;
        session.upload(local, remote, timeout).await
    }

    /// Find the active controller again after a swact.
    ///
    /// Both controller sessions are dropped; a fresh active-controller
    /// session asks the host for its name, and later standby-controller
    /// sessions go to the other controller node of the inventory.
    pub async fn refresh_active_controller(&mut self, timeout: Duration) -> Result<String> {
        self.discard(&SessionName::ActiveController).await;
        self.discard(&SessionName::StandbyController).await;

        let result = self
            .send(&SessionName::ActiveController, "hostname", &SendOptions::new(timeout))
            .await?;
        if !result.is_success() {
            return Err(CommandError::Failed {
                exit_code: result.code(),
                command: result.command,
                output: result.lines,
            }
            .into());
        }
        let host = result
            .lines
            .iter()
            .map(|l| l.trim())
            .rfind(|l| !l.is_empty())
            .ok_or_else(|| RegistryError::NoActiveController("'hostname' printed nothing".to_string()))?
            .to_string();

        if self.active_host.as_deref() != Some(host.as_str()) {
            info!("active controller is now {}", host);
        }
        self.active_host = Some(host.clone());
        Ok(host)
    }

    /// Close and forget the session for `name`.
    pub async fn close(&mut self, name: &SessionName) -> Result<()> {
        match self.sessions.shift_remove(name) {
            Some(mut session) => session.close().await,
            None => Ok(()),
        }
    }

    /// Close every session.
    pub async fn close_all(&mut self) {
        for (name, mut session) in std::mem::take(&mut self.sessions) {
            if let Err(e) = session.close().await {
                warn!("[{}] close failed: {}", name, e);
            }
        }
    }

    async fn send_with_reopen(
        &mut self,
        name: &SessionName,
        command: &str,
        opts: &SendOptions,
        sudo: bool,
    ) -> Result<CommandResult> {
        let mut reopened = false;
        loop {
            let outcome = match self.session(name).await {
                Ok(session) if sudo => session.send_sudo(command, opts).await,
                Ok(session) => session.send(command, opts).await,
                Err(e) => Err(e),
            };
            match outcome {
                Err(e) if !reopened && e.warrants_reopen() => {
                    warn!("[{}] {}; re-opening the session once", name, e);
                    self.discard(name).await;
                    reopened = true;
                }
                other => return other,
            }
        }
    }

    fn config_for(&self, name: &SessionName) -> Result<SessionConfig> {
        if *name == SessionName::StandbyController
            && let Some(active) = &self.active_host
        {
            let others: Vec<String> = self
                .inventory
                .controller_nodes()
                .into_iter()
                .filter(|n| n != active)
                .collect();
            if let [standby] = others.as_slice() {
                let mut config = self.inventory.controller_node(standby)?;
                config.name = name.to_string();
                return Ok(config);
            }
        }
        self.inventory.resolve(name)
    }

    async fn discard(&mut self, name: &SessionName) {
        if let Some(mut session) = self.sessions.shift_remove(name) {
            if let Err(e) = session.close().await {
                debug!("[{}] close of stale session failed: {}", name, e);
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("active_host", &self.active_host)
            .finish_non_exhaustive()
    }
}

/// A registry name used as a [`CommandTarget`], so dispatched commands get
/// the registry's re-open handling.
pub struct RegistryTarget<'a> {
    registry: &'a mut SessionRegistry,
    name: SessionName,
}

impl CommandTarget for RegistryTarget<'_> {
    fn send(&mut self, command: &str, opts: &SendOptions) -> impl Future<Output = Result<CommandResult>> + Send {
        self.registry.send(&self.name, command, opts)
    }

    fn send_sudo(
        &mut self,
        command: &str,
        opts: &SendOptions,
    ) -> impl Future<Output = Result<CommandResult>> + Send {
        self.registry.send_sudo(&self.name, command, opts)
    }
}
