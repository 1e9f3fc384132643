//! Certsmith Core - certificate record model and lifecycle rules
//!
//! This crate holds the pure parts of certsmith: the certificate record, its
//! status state machine and the parser for `certbot certificates` output.
//! Nothing here performs I/O.
//!
//! SSH, provisioning, storage and the CLI live in the `certsmith` crate.

mod certinfo;
mod lifecycle;
mod record;

pub use certinfo::*;
pub use lifecycle::*;
pub use record::*;
