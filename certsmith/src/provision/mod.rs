//! Remote certificate provisioning
//!
//! Install and renew protocols run over a [`RemoteSession`](crate::ssh::RemoteSession):
//! - connectivity probe, certbot presence check and install sequence
//! - web server liveness check
//! - issuance (plugin or webroot mode) or renewal
//! - certificate info query, parsed into the record

mod commands;
mod error;
mod orchestrator;
mod steps;

pub use orchestrator::*;
