//! # stow (app library)
//!
//! The CLI, HTTP API and schema loading behind the `stow` binary, exposed as
//! a library so integration tests can drive the router directly.

pub mod api;
pub mod cli;
pub mod config;
