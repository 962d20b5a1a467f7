//! # stxcli
//!
//! Remote CLI execution and structured-output engine for edge-cloud test
//! automation.
//!
//! stxcli keeps long-lived interactive SSH sessions to controllers,
//! subclouds and test servers, runs platform CLI commands on them in the
//! right authentication context, parses the ASCII tables those commands
//! print, and polls long-running operations until they settle.
//!
//! ## Layers
//!
//! - [`transport`]: russh connection and PTY shell ([`ShellChannel`](transport::ShellChannel))
//! - [`channel`]: prompt patterns and tail-only search over shell output
//! - [`session`]: prompt-driven [`Session`](session::Session) with sudo, prompt
//!   guards, interactive answers and file transfer
//! - [`registry`]: symbolic names (`active-controller`, `subcloud:<name>`) to sessions
//! - [`dispatch`]: structured [`Invocation`](dispatch::Invocation)s and the dispatcher
//! - [`table`]: horizontal, vertical and `kubectl` table parsers and filters
//! - [`tracker`]: status polling with deadlines
//! - [`cleanup`]: reverse-order resource teardown by scope
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stxcli::dispatch::Invocation;
//! use stxcli::registry::{SessionName, SessionRegistry, StaticInventory};
//! use stxcli::table;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stxcli::Error> {
//!     let inventory = StaticInventory::from_path("lab.json")?;
//!     let mut registry = SessionRegistry::ssh(Arc::new(inventory));
//!
//!     let list = Invocation::builder("system", "host-list", Duration::from_secs(60))
//!         .credentials("admin")
//!         .build();
//!     let result = registry.run(&SessionName::ActiveController, &list).await?;
//!
//!     let hosts = table::parse_horizontal(&result.lines)?;
//!     for host in &hosts {
//!         println!("{} is {}", host["hostname"], host["availability"]);
//!     }
//!
//!     registry.close_all().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use log::info;

pub mod channel;
pub mod cleanup;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod session;
pub mod table;
pub mod tracker;
pub mod transport;

// Re-export main types for convenience
pub use cleanup::{CleanupRegistry, CleanupScope};
pub use dispatch::{Dispatcher, Invocation};
pub use error::{Error, ErrorKind, Result};
pub use registry::{SessionName, SessionRegistry};
pub use session::{CommandResult, SendOptions, Session, SessionConfig};
pub use table::{Record, Table};
pub use tracker::{TrackOutcome, TrackSpec, track};
pub use transport::{AuthMethod, SshConfig};

static STEP: AtomicUsize = AtomicUsize::new(0);

/// Log a numbered test step on the `stxcli::step` target.
///
/// Returns the step number.
pub fn log_step(description: &str) -> usize {
    let step = STEP.fetch_add(1, Ordering::Relaxed) + 1;
    info!(target: "stxcli::step", "Step {}: {}", step, description);
    step
}
