//! Byte-level shell channel abstraction.
//!
//! A [`Session`](crate::session::Session) talks to the remote shell only
//! through [`ShellChannel`], so the prompt engine can be driven by a real
//! russh PTY or by an in-memory script in tests.

use async_trait::async_trait;
use bytes::Bytes;

use super::config::SshConfig;
use crate::error::Result;

/// A bidirectional interactive shell stream.
#[async_trait]
pub trait ShellChannel: Send {
    /// Write raw bytes to the remote shell's stdin.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for the next chunk of output. `Ok(None)` means the channel closed.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Whether the underlying connection is still up.
    fn is_alive(&self) -> bool {
        true
    }

    /// Tear down the channel and its connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens shell channels for session configurations.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, authenticate and start an interactive shell.
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn ShellChannel>>;
}
