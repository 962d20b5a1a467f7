//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level SSH connection management,
//! handling connection setup, authentication, and the interactive
//! shell stream sessions are built on.

pub mod config;
mod shell;
mod ssh;

#[cfg(test)]
pub(crate) mod scripted;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use shell::{Connector, ShellChannel};
pub use ssh::{RusshShell, SshConnector, SshTransport};
