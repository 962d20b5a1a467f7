//! Channel layer for pattern matching on shell output.
//!
//! This module handles prompt detection over the raw byte stream,
//! including tail-only pattern search and ANSI stripping.

mod buffer;
pub mod patterns;

pub use buffer::{DEFAULT_SEARCH_DEPTH, PatternBuffer};
pub use patterns::{
    CONTROLLER_PROMPT, DEFAULT_PROMPT, PASSWORD_PROMPT, ROOT_PROMPT, compile_prompt_pattern,
};
