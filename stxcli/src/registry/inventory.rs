//! Where session names get their endpoints and credentials.

use std::path::Path;

use indexmap::IndexMap;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::name::SessionName;
use crate::error::{RegistryError, Result};
use crate::session::SessionConfig;
use crate::transport::HostKeyVerification;

/// Lab description the registry and dispatcher resolve against.
pub trait Inventory: Send + Sync {
    /// Session configuration for a symbolic name.
    fn resolve(&self, name: &SessionName) -> Result<SessionConfig>;

    /// Shell statement installing the credentials of `profile`
    /// (e.g. `source /etc/platform/openrc`).
    fn credential_profile(&self, profile: &str) -> Result<String>;

    /// Hostnames of the individually addressable controllers.
    fn controller_nodes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Session configuration for one controller by hostname
    /// (`controller-1`), used to follow a swact.
    fn controller_node(&self, hostname: &str) -> Result<SessionConfig> {
        Err(RegistryError::UnknownName(hostname.to_string()).into())
    }
}

/// One host entry of a [`StaticInventory`] document.
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub private_key: Option<String>,

    /// Prompt regex; the generic `user@host$` prompt when omitted.
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub sudo_password: Option<SecretString>,

    #[serde(default)]
    pub on_open_commands: Vec<String>,

    #[serde(default)]
    pub host_key_verification: HostKeyVerification,
}

fn default_port() -> u16 {
    22
}

impl HostEntry {
    fn to_config(&self, name: &str) -> Result<SessionConfig> {
        let mut builder = SessionConfig::builder(&self.host)
            .name(name)
            .port(self.port)
            .username(&self.username)
            .host_key_verification(self.host_key_verification.clone());
        if let Some(password) = &self.password {
            builder = builder.password(password.expose_secret());
        }
        if let Some(key) = &self.private_key {
            builder = builder.private_key(key);
        }
        if let Some(prompt) = &self.prompt {
            builder = builder.prompt(prompt);
        }
        if let Some(password) = &self.sudo_password {
            builder = builder.sudo_password(password.expose_secret());
        }
        for command in &self.on_open_commands {
            builder = builder.on_open_command(command);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
struct Document {
    hosts: IndexMap<String, HostEntry>,

    #[serde(default)]
    controllers: IndexMap<String, HostEntry>,

    #[serde(default)]
    credential_profiles: IndexMap<String, String>,
}

/// An [`Inventory`] loaded from a JSON lab description.
///
/// ```json
/// {
///   "hosts": {
///     "active-controller": { "host": "10.10.10.2", "username": "sysadmin", "password": "..." },
///     "subcloud:subcloud1": { "host": "10.10.20.2", "username": "sysadmin", "password": "..." }
///   },
///   "controllers": {
///     "controller-0": { "host": "10.10.10.3", "username": "sysadmin", "password": "..." },
///     "controller-1": { "host": "10.10.10.4", "username": "sysadmin", "password": "..." }
///   },
///   "credential_profiles": { "admin": "source /etc/platform/openrc" }
/// }
/// ```
#[derive(Debug)]
pub struct StaticInventory {
    hosts: IndexMap<SessionName, HostEntry>,
    controllers: IndexMap<String, HostEntry>,
    profiles: IndexMap<String, String>,
}

impl StaticInventory {
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: Document =
            serde_json::from_str(text).map_err(|e| RegistryError::Inventory(e.to_string()))?;

        let mut hosts = IndexMap::with_capacity(doc.hosts.len());
        for (name, entry) in doc.hosts {
            hosts.insert(name.parse::<SessionName>()?, entry);
        }
        debug!(
            "inventory: {} hosts, {} controllers, {} credential profiles",
            hosts.len(),
            doc.controllers.len(),
            doc.credential_profiles.len()
        );
        Ok(Self {
            hosts,
            controllers: doc.controllers,
            profiles: doc.credential_profiles,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Inventory(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn names(&self) -> impl Iterator<Item = &SessionName> {
        self.hosts.keys()
    }
}

impl Inventory for StaticInventory {
    fn resolve(&self, name: &SessionName) -> Result<SessionConfig> {
        let entry = self
            .hosts
            .get(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))?;
        entry.to_config(&name.to_string())
    }

    fn credential_profile(&self, profile: &str) -> Result<String> {
        self.profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProfile(profile.to_string()).into())
    }

    fn controller_nodes(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    fn controller_node(&self, hostname: &str) -> Result<SessionConfig> {
        let entry = self
            .controllers
            .get(hostname)
            .ok_or_else(|| RegistryError::UnknownName(hostname.to_string()))?;
        entry.to_config(hostname)
    }
}
