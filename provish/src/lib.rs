//! # Provish
//!
//! Async remote agent provisioning over SSH interactive shells and
//! administrative-share executors.
//!
//! A host plan carries one solution per execution path. Unix-like targets
//! (and Windows hosts running an SSH server) receive the `shell` solution as
//! one compound command over a PTY shell; Windows targets reached on the
//! administrative share port receive the `batch` solution, one command at a
//! time.
//!
//! ## Features
//!
//! - Async SSH connections via russh, with password, keyboard-interactive
//!   and private key authentication
//! - Expect-style command exchange: echo removal, sudo password injection,
//!   missing-sudo fallback and failure classification
//! - Local dependency cache filled over HTTP
//! - Step-level progress reports to the log or a callback endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provish::{Driver, SessionBuilder, TargetOs};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), provish::Error> {
//!     let mut session = SessionBuilder::new("192.168.1.10")
//!         .account("deploy")
//!         .identity("secret")
//!         .os(TargetOs::Linux)
//!         .connect()
//!         .await?;
//!
//!     // Runs as `sudo id -u`; the password prompt is answered once.
//!     let response = session.send_command("id -u").await?;
//!     println!("{}", response.result);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod driver;
pub mod error;
pub mod platform;
pub mod provision;
pub mod report;
pub mod solution;
pub mod transport;

// Re-export main types for convenience
pub use driver::{Driver, Response, SendOptions, Session, SessionBuilder};
pub use error::Error;
pub use platform::TargetOs;
pub use provision::{HostTarget, Provisioner, SessionOptions};
pub use report::{CallbackSink, ConsoleSink, LogSink, Status};
pub use solution::{ExecutionSolution, HostSolutions, RunnerConfig, SolutionKind, SolutionRunner};
pub use transport::{Credential, HostKeyVerification, SshConfig};
