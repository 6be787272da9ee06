//! Builder for opening sessions.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use super::elevation::ElevationPolicy;
use super::session::Session;
use crate::channel::ChannelConfig;
use crate::error::Result;
use crate::platform::TargetOs;
use crate::transport::{Credential, HostKeyVerification, SshConfig};

/// Builder for [`Session`].
///
/// # Example
///
/// ```rust,no_run
/// use provish::driver::{Driver, SessionBuilder};
///
/// # async fn example() -> Result<(), provish::Error> {
/// let mut session = SessionBuilder::new("192.168.1.10")
///     .account("deploy")
///     .identity("secret")
///     .connect()
///     .await?;
///
/// let response = session.send_command("uname -s").await?;
/// println!("{}", response.result);
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    host: String,
    port: u16,
    account: String,
    credential: Credential,
    os: TargetOs,
    timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    channel_config: ChannelConfig,
    elevation: ElevationPolicy,
    terminal_width: u32,
    terminal_height: u32,
    negotiate_prompt: bool,
}

impl SessionBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            account: "root".to_string(),
            credential: Credential::Password(SecretString::from(String::new())),
            os: TargetOs::default(),
            timeout: Duration::from_secs(10),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            channel_config: ChannelConfig::default(),
            elevation: ElevationPolicy::default(),
            terminal_width: 511,
            terminal_height: 24,
            negotiate_prompt: true,
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login account (default: root).
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Password or private key text; see [`Credential::from_identity`].
    pub fn identity(mut self, identity: &str) -> Self {
        self.credential = Credential::from_identity(identity);
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// Passphrase for an encrypted private key. Ignored for passwords.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.credential = self.credential.with_passphrase(passphrase);
        self
    }

    pub fn os(mut self, os: TargetOs) -> Self {
        self.os = os;
        self
    }

    /// Set the connect and handshake timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn elevation(mut self, policy: ElevationPolicy) -> Self {
        self.elevation = policy;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Install the provisioning prompt after login (default: true).
    pub fn negotiate_prompt(mut self, enabled: bool) -> Self {
        self.negotiate_prompt = enabled;
        self
    }

    /// The SSH configuration this builder would connect with.
    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new(&self.host, &self.account, self.credential.clone());
        config.port = self.port;
        config.timeout = self.timeout;
        config.host_key_verification = self.host_key_verification.clone();
        config.known_hosts_path = self.known_hosts_path.clone();
        config.terminal_width = self.terminal_width;
        config.terminal_height = self.terminal_height;
        config
    }

    /// Connect, authenticate and open the command shell.
    pub async fn connect(self) -> Result<Session> {
        let ssh = self.ssh_config();
        Session::open(
            ssh,
            self.channel_config,
            self.elevation,
            self.os,
            self.negotiate_prompt,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_carries_settings() {
        let config = SessionBuilder::new("10.0.0.5")
            .port(2222)
            .account("deploy")
            .identity("pw")
            .timeout(Duration::from_secs(3))
            .host_key_verification(HostKeyVerification::Strict)
            .known_hosts_path("/tmp/known_hosts")
            .terminal_size(200, 50)
            .ssh_config();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 2222);
        assert_eq!(config.account, "deploy");
        assert!(!config.credential.is_private_key());
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(matches!(
            config.host_key_verification,
            HostKeyVerification::Strict
        ));
        assert_eq!(
            config.known_hosts_path.as_deref(),
            Some(std::path::Path::new("/tmp/known_hosts"))
        );
        assert_eq!((config.terminal_width, config.terminal_height), (200, 50));
    }

    #[test]
    fn test_passphrase_only_applies_to_keys() {
        let builder = SessionBuilder::new("h").identity("pw").passphrase("unused");
        assert!(matches!(builder.ssh_config().credential, Credential::Password(_)));
    }
}
