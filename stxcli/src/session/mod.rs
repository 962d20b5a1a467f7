//! Prompt-driven interactive sessions.
//!
//! A [`Session`] owns one shell channel to one host as one user. Commands
//! are written as lines; completion is detected by matching the prompt
//! regex against the tail of the output, and the exit status is fetched
//! with `echo $?`.

mod config;
mod connection;
mod interactive;
mod ops;
mod prompt;
mod result;


pub use config::{SessionConfig, SessionConfigBuilder};
pub use connection::{Session, SessionState};
pub use interactive::{InteractiveResult, InteractiveStep, PromptResponse};
pub use prompt::PromptGuard;
pub use result::{CommandResult, SendOptions};
