//! SSH transport implementation using russh.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use russh::client::{self, AuthResult, Handle, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, decode_secret_key};
use russh::{ChannelStream, MethodKind};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::{Credential, HostKeyVerification, SshConfig};
use crate::error::{AuthError, ChannelError, Result};

/// Challenge rounds answered before keyboard-interactive auth is abandoned.
const MAX_CHALLENGE_ROUNDS: usize = 4;

/// Authenticated SSH connection.
pub struct SshTransport {
    /// The russh session handle, `None` once closed.
    session: Option<Handle<SshHandler>>,

    /// Configuration used for this connection.
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    ///
    /// Any failure after the TCP connection is established disconnects
    /// before the error is returned.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        info!(
            "connecting to {}@{}:{}",
            config.account, config.host, config.port
        );

        let stream = match timeout(
            config.timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_error(&config, e).into()),
            Err(_) => {
                let e = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {:?}", config.timeout),
                );
                return Err(connect_error(&config, e).into());
            }
        };

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = match timeout(
            config.timeout,
            client::connect_stream(ssh_config, stream, handler),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                // check_server_key stores why it rejected; russh only reports UnknownKey
                let stored = host_key_error.lock().ok().and_then(|mut err| err.take());
                let err = match (stored, e) {
                    (Some(reason), _) => bad_host_key(&config, reason),
                    (None, russh::Error::UnknownKey) => {
                        bad_host_key(&config, "host key rejected".to_string())
                    }
                    (None, e) => transport_error(&config, e),
                };
                return Err(err.into());
            }
            Err(_) => {
                let e = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no SSH handshake within {:?}", config.timeout),
                );
                return Err(connect_error(&config, e).into());
            }
        };

        if let Err(e) = Self::authenticate(&mut session, &config).await {
            warn!("{}", e);
            disconnect_quietly(session).await;
            return Err(e.into());
        }

        info!("authenticated {}@{}", config.account, config.host);
        Ok(Self {
            session: Some(session),
            config,
        })
    }

    /// Open a PTY shell and return it as a byte stream.
    pub async fn open_shell(&self) -> std::result::Result<ChannelStream<Msg>, ChannelError> {
        let session = self.session.as_ref().ok_or(ChannelError::Closed)?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(ChannelError::OpenFailed)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(ChannelError::OpenFailed)?;

        channel
            .request_shell(true)
            .await
            .map_err(ChannelError::OpenFailed)?;

        Ok(channel.into_stream())
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Whether the connection is closed, by us or by the server.
    pub fn is_closed(&self) -> bool {
        self.session.as_ref().is_none_or(|s| s.is_closed())
    }

    /// Close the connection. Safe to call repeatedly; errors are swallowed.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            disconnect_quietly(session).await;
        }
    }

    async fn authenticate(
        session: &mut Handle<SshHandler>,
        config: &SshConfig,
    ) -> std::result::Result<(), AuthError> {
        match &config.credential {
            Credential::PrivateKey { pem, passphrase } => {
                let key = decode_secret_key(
                    pem.expose_secret(),
                    passphrase.as_ref().map(|p| p.expose_secret()),
                )
                .map_err(|e| match e {
                    russh::keys::Error::KeyIsEncrypted => AuthError::KeyPassphraseRequired {
                        account: config.account.clone(),
                    },
                    other => AuthError::InvalidKey {
                        account: config.account.clone(),
                        reason: other.to_string(),
                    },
                })?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| transport_error(config, e))?
                    .flatten();

                let result = session
                    .authenticate_publickey(
                        &config.account,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| transport_error(config, e))?;

                if result.success() {
                    Ok(())
                } else {
                    Err(rejected(config))
                }
            }

            Credential::Password(password) => {
                let result = session
                    .authenticate_password(&config.account, password.expose_secret())
                    .await
                    .map_err(|e| transport_error(config, e))?;

                match result {
                    AuthResult::Success => Ok(()),
                    AuthResult::Failure {
                        remaining_methods, ..
                    } => {
                        if remaining_methods.contains(&MethodKind::Password) {
                            Err(rejected(config))
                        } else if remaining_methods.contains(&MethodKind::KeyboardInteractive) {
                            debug!("password auth not supported, trying keyboard-interactive");
                            Self::keyboard_interactive(session, config, password).await
                        } else {
                            Err(unsupported(config, "password authentication not offered"))
                        }
                    }
                }
            }

            Credential::Interactive(secret) => {
                Self::keyboard_interactive(session, config, secret).await
            }
        }
    }

    /// Answer a username/password challenge. Challenges with more than one
    /// field (multi-factor flows) are not supported.
    async fn keyboard_interactive(
        session: &mut Handle<SshHandler>,
        config: &SshConfig,
        password: &SecretString,
    ) -> std::result::Result<(), AuthError> {
        let mut response = session
            .authenticate_keyboard_interactive_start(&config.account, None::<String>)
            .await
            .map_err(|e| transport_error(config, e))?;

        for _ in 0..MAX_CHALLENGE_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure { .. } => return Err(rejected(config)),
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    if prompts.len() > 1 {
                        return Err(unsupported(
                            config,
                            &format!("challenge asks for {} fields", prompts.len()),
                        ));
                    }
                    let answers = prompts
                        .iter()
                        .map(|p| {
                            if p.prompt.trim().to_lowercase().ends_with("username:") {
                                config.account.clone()
                            } else {
                                password.expose_secret().to_string()
                            }
                        })
                        .collect();
                    response = session
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(|e| transport_error(config, e))?;
                }
            }
        }

        Err(unsupported(config, "too many challenge rounds"))
    }
}

async fn disconnect_quietly(session: Handle<SshHandler>) {
    if let Err(e) = session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("ignoring error while disconnecting: {}", e);
    }
}

fn connect_error(config: &SshConfig, source: io::Error) -> AuthError {
    AuthError::ConnectError {
        host: config.host.clone(),
        port: config.port,
        account: config.account.clone(),
        source,
    }
}

fn bad_host_key(config: &SshConfig, reason: String) -> AuthError {
    AuthError::BadHostKey {
        host: config.host.clone(),
        port: config.port,
        account: config.account.clone(),
        reason,
    }
}

fn transport_error(config: &SshConfig, source: russh::Error) -> AuthError {
    AuthError::TransportError {
        host: config.host.clone(),
        port: config.port,
        account: config.account.clone(),
        source,
    }
}

fn rejected(config: &SshConfig) -> AuthError {
    AuthError::AuthenticationRejected {
        host: config.host.clone(),
        port: config.port,
        account: config.account.clone(),
    }
}

fn unsupported(config: &SshConfig, reason: &str) -> AuthError {
    AuthError::UnsupportedAuthType {
        host: config.host.clone(),
        port: config.port,
        account: config.account.clone(),
        reason: reason.to_string(),
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Why the host key was rejected, so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<String>>>,
}

impl SshHandler {
    /// `Ok(true)` if matched, `Ok(false)` if the host is unknown,
    /// `Err(reason)` if the key changed or known_hosts is unreadable.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, String> {
        let result = match &self.known_hosts_path {
            Some(path) if !path.exists() => return Ok(false),
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => {
                Err(format!("host key changed (known_hosts line {})", line))
            }
            Err(e) => Err(format!("known_hosts check failed: {}", e)),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) {
        let result = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };
        if let Err(e) = result {
            warn!("failed to save host key for {}: {}", self.host, e);
        }
    }

    fn reject(&self, reason: String) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(reason);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    info!("trusting new host key for {}:{}", self.host, self.port);
                    self.learn_host_key(server_public_key);
                    Ok(true)
                }
                Err(reason) => Ok(self.reject(reason)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject("host not in known_hosts".to_string())),
                Err(reason) => Ok(self.reject(reason)),
            },
        }
    }
}
