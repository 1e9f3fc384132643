//! SSH client for remote certificate operations
//!
//! Provides async SSH connectivity for:
//! - Password or private-key authentication
//! - Command execution with a per-command timeout
//! - A trait seam so provisioning can run against scripted hosts in tests

mod client;
mod error;
mod session;

#[cfg(test)]
pub mod fake;

pub use client::*;
pub use error::*;
pub use session::*;
