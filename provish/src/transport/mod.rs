//! SSH transport layer wrapping russh.
//!
//! Connection setup, host key policy, credential handling and the PTY
//! shell request live here.

pub mod config;
pub mod identity;
mod ssh;

pub use config::{Credential, HostKeyVerification, SshConfig};
pub use ssh::SshTransport;
