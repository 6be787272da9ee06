//! Error types for provish.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for provisioning operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Session establishment and authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Interactive channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Classified failures of a remote command
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Dependency artifact could not be fetched
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Invalid credentials or plan for the selected execution path
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Administrative one-shot executor failures
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// Failures while opening an authenticated session.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The host key did not match the recorded one, or was unknown in strict mode
    #[error("SSH host key could not be verified - {account}@{host}:{port}: {reason}")]
    BadHostKey {
        host: String,
        port: u16,
        account: String,
        reason: String,
    },

    /// The server rejected the supplied credentials
    #[error("SSH authentication failed - {account}@{host}:{port}")]
    AuthenticationRejected {
        host: String,
        port: u16,
        account: String,
    },

    /// The server does not offer a method we can drive
    #[error("Unsupported authentication type - {account}@{host}:{port}: {reason}")]
    UnsupportedAuthType {
        host: String,
        port: u16,
        account: String,
        reason: String,
    },

    /// The private key is encrypted and no passphrase was supplied
    #[error("Private key for '{account}' requires a passphrase")]
    KeyPassphraseRequired { account: String },

    /// The private key could not be decoded
    #[error("Invalid private key for '{account}': {reason}")]
    InvalidKey { account: String, reason: String },

    /// TCP connect failed or timed out
    #[error("TCP connect failed - {account}@{host}:{port}: {source}")]
    ConnectError {
        host: String,
        port: u16,
        account: String,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH connect failed - {account}@{host}:{port}: {source}")]
    TransportError {
        host: String,
        port: u16,
        account: String,
        #[source]
        source: russh::Error,
    },
}

/// Interactive channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No data arrived within the configured read timeout
    #[error("recv timed out after {0:?}")]
    Timeout(Duration),

    /// Channel closed by either side
    #[error("Channel closed")]
    Closed,

    /// Failed to open the PTY shell channel
    #[error("Failed to open shell channel: {0}")]
    OpenFailed(#[source] russh::Error),

    /// I/O error on the channel stream
    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures classified from remote command output.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Elevation password rejected, requested twice, or unavailable
    #[error("sudo authentication failed: {output}")]
    SudoAuthenticationFailed { output: String },

    /// Output carried a known failure signature
    #[error("{reason}: {output}")]
    RemoteCommandFailed { reason: String, output: String },
}

/// Dependency download failures.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport failure
    #[error("download from {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("download from {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// Writing into the local cache failed
    #[error("writing {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Invalid configuration for the chosen execution path.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A key file was supplied where only passwords are accepted
    #[error("identity seems like a key file, which is not supported by windows authentication")]
    KeyFileCredential,

    /// The plan has no solution of the selected kind
    #[error("no '{kind}' solution in host plan")]
    MissingSolution { kind: String },

    /// The plan could not be decoded
    #[error("invalid host plan: {message}")]
    InvalidPlan { message: String },

    /// The reporting proxy address was rejected
    #[error("invalid proxy address '{address}': {reason}")]
    InvalidProxy { address: String, reason: String },
}

/// Administrative executor failures.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The helper process could not be started
    #[error("failed to spawn executor: {0}")]
    Spawn(#[source] io::Error),

    /// The helper exited unsuccessfully
    #[error("command '{command}' failed (exit {code:?}): {output}")]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

/// Result type alias using provish's Error.
pub type Result<T> = std::result::Result<T, Error>;
