//! An authenticated SSH connection with one command shell.

use log::{debug, info};
use russh::ChannelStream;
use russh::client::Msg;

use super::Driver;
use super::command::CommandChannel;
use super::elevation::ElevationPolicy;
use super::exchange::SendOptions;
use super::response::Response;
use crate::channel::{ChannelConfig, PtyChannel};
use crate::error::Result;
use crate::platform::TargetOs;
use crate::transport::{SshConfig, SshTransport};

/// Shell stream type of a live session.
pub type ShellStream = ChannelStream<Msg>;

/// Live session: the transport plus the command channel on its shell.
///
/// Created by [`SessionBuilder::connect`](super::SessionBuilder::connect).
pub struct Session {
    transport: SshTransport,
    channel: CommandChannel<ShellStream>,
    os: TargetOs,
}

impl Session {
    /// Connect, authenticate, open the shell and optionally install the
    /// provisioning prompt.
    ///
    /// If the shell cannot be opened the transport is closed before the
    /// error is returned.
    pub(crate) async fn open(
        ssh: SshConfig,
        channel_config: ChannelConfig,
        elevation: ElevationPolicy,
        os: TargetOs,
        negotiate_prompt: bool,
    ) -> Result<Self> {
        let password = ssh.credential.elevation_password().cloned();
        let account = ssh.account.clone();
        let mut transport = SshTransport::connect(ssh).await?;

        let stream = match transport.open_shell().await {
            Ok(stream) => stream,
            Err(e) => {
                transport.close().await;
                return Err(e.into());
            }
        };
        debug!("shell opened for {}", account);

        let pty = PtyChannel::new(stream, channel_config);
        let mut channel = CommandChannel::new(pty, account, password, elevation)
            .with_garbled_echo(os.echoes_garbled());
        if negotiate_prompt {
            channel.get_and_set_prompt().await;
        }

        info!(
            "session ready on {} ({})",
            transport.config().host,
            os
        );
        Ok(Self {
            transport,
            channel,
            os,
        })
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn host(&self) -> &str {
        &self.transport.config().host
    }

    /// Prompt read back after negotiation, if any.
    pub fn prompt(&self) -> Option<&str> {
        self.channel.prompt()
    }

    pub fn channel(&self) -> &CommandChannel<ShellStream> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<ShellStream> {
        &mut self.channel
    }
}

impl Driver for Session {
    async fn send_command_with(&mut self, command: &str, options: SendOptions) -> Result<Response> {
        self.channel.execute(command, options).await
    }

    async fn close(&mut self) {
        self.channel.close().await;
        self.transport.close().await;
    }

    fn is_open(&self) -> bool {
        self.channel.is_open() && !self.transport.is_closed()
    }
}
