//! Credential encryption at rest
//!
//! SSH passwords and private keys are stored sealed with AES-256-GCM and only
//! revealed, as a zeroize-on-drop [`Secret`], for the duration of a connection.

mod credentials;
mod error;
mod secrets;

pub use credentials::*;
pub use error::*;
pub use secrets::*;
