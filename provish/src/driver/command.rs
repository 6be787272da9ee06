//! Command execution over one interactive shell.

use std::time::Instant;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite};

use super::Driver;
use super::elevation::ElevationPolicy;
use super::exchange::{Action, CommandExchange, SendOptions};
use super::response::Response;
use crate::channel::classifier::{is_console_ready, normalize, normalize_str, strip_control};
use crate::channel::{OutputBuffer, PtyChannel};
use crate::error::{ChannelError, Result};

/// Prompt installed right after login so that readiness is unambiguous.
pub const PROVISION_PROMPT: &str = r#"export PS1="[\u@\h_provish \W]\$""#;

/// Marker carried by [`PROVISION_PROMPT`].
pub const PROMPT_MARKER: &str = "_provish";

/// Single-owner command channel bound to one shell.
///
/// Commands are sent one at a time; the channel is not shared.
pub struct CommandChannel<S> {
    channel: PtyChannel<S>,
    account: String,
    password: Option<SecretString>,
    elevation: ElevationPolicy,
    garbled_echo: bool,
    prompt: Option<String>,
}

impl<S> CommandChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Bind a shell to `account`. `password` answers sudo prompts.
    pub fn new(
        channel: PtyChannel<S>,
        account: impl Into<String>,
        password: Option<SecretString>,
        elevation: ElevationPolicy,
    ) -> Self {
        Self {
            channel,
            account: account.into(),
            password,
            elevation,
            garbled_echo: false,
            prompt: None,
        }
    }

    /// Enable the garbled-echo heuristic (AIX shells).
    pub fn with_garbled_echo(mut self, garbled: bool) -> Self {
        self.garbled_echo = garbled;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The prompt seen by the last [`get_prompt`](Self::get_prompt).
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn pty(&self) -> &PtyChannel<S> {
        &self.channel
    }

    pub fn pty_mut(&mut self) -> &mut PtyChannel<S> {
        &mut self.channel
    }

    /// Send a command with explicit options.
    pub async fn execute(&mut self, command: &str, options: SendOptions) -> Result<Response> {
        let start = Instant::now();
        let elevated = self.elevation.apply(&self.account, command);

        let mut exchange = CommandExchange::new(
            elevated.line,
            self.account.as_str(),
            options,
            self.channel.config().search_depth,
        )
        .with_password(self.password.is_some())
        .with_garbled_echo(self.garbled_echo);
        if let Some(bare) = elevated.bare {
            exchange = exchange.with_elevation_fallback(self.elevation.prefix(), bare);
        }

        debug!("sending: {}", exchange.line().trim_end());
        self.channel.send(exchange.line()).await?;
        self.channel.wait_for_output().await?;

        loop {
            self.channel.pause().await;
            let chunk = match self.channel.recv().await {
                Ok(chunk) => chunk,
                Err(ChannelError::Timeout(t)) => return Err(exchange.timed_out(t).into()),
                Err(e) => return Err(e.into()),
            };

            match exchange.feed(&chunk) {
                Action::Continue => {}
                Action::InjectPassword => {
                    if let Some(password) = &self.password {
                        debug!("answering sudo prompt for {} with ***", self.account);
                        self.channel
                            .send(&format!("{}\n", password.expose_secret()))
                            .await?;
                    }
                }
                Action::Resend(line) => {
                    warn!(
                        "'{}' not found on remote, retrying without it",
                        self.elevation.prefix().trim()
                    );
                    self.channel.send(&line).await?;
                    self.channel.wait_for_output().await?;
                }
                Action::Complete(result) => {
                    return Ok(Response {
                        command: command.to_string(),
                        sent: exchange.line().trim_end().to_string(),
                        result,
                        raw_result: exchange.raw_output(),
                        elevated: exchange.password_sent(),
                        elapsed: start.elapsed(),
                    });
                }
                Action::Fail(e) => {
                    warn!("command '{}' failed: {}", command.trim_end(), e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Send a bare newline and return the prompt the shell answers with.
    pub async fn get_prompt(&mut self) -> Result<String> {
        self.channel.send("\n").await?;
        let mut buffer = OutputBuffer::new(self.channel.config().search_depth);

        loop {
            self.channel.pause().await;
            buffer.extend(&self.channel.recv().await?);
            if is_console_ready(&normalize(buffer.search_tail())) {
                break;
            }
        }

        let text = strip_control(buffer.window());
        let prompt = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        debug!("shell prompt is '{}'", prompt);
        self.prompt = Some(prompt.clone());
        Ok(prompt)
    }

    /// Send a prompt-setting command and wait for the new prompt.
    ///
    /// The new prompt is recognized by [`PROMPT_MARKER`] appearing after the
    /// echoed command, followed by a prompt terminator.
    pub async fn set_prompt(&mut self, command: &str) -> Result<()> {
        self.channel.send(&format!("{}\n", command)).await?;
        let echo = normalize_str(command);
        let mut buffer = OutputBuffer::new(self.channel.config().search_depth);

        loop {
            self.channel.pause().await;
            buffer.extend(&self.channel.recv().await?);
            let normalized = normalize(buffer.search_tail()).replacen(&echo, "", 1);
            if normalized.contains(PROMPT_MARKER) && is_console_ready(&normalized) {
                return Ok(());
            }
        }
    }

    /// Install [`PROVISION_PROMPT`] and read it back.
    ///
    /// Failure is not fatal: the default prompt heuristics still apply.
    pub async fn get_and_set_prompt(&mut self) -> Option<String> {
        let negotiated = async {
            self.set_prompt(PROVISION_PROMPT).await?;
            self.get_prompt().await
        };
        match negotiated.await {
            Ok(prompt) => {
                info!("prompt set to '{}'", prompt);
                Some(prompt)
            }
            Err(e) => {
                warn!("could not set shell prompt, using defaults: {}", e);
                None
            }
        }
    }
}

impl<S> Driver for CommandChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn send_command_with(&mut self, command: &str, options: SendOptions) -> Result<Response> {
        self.execute(command, options).await
    }

    async fn close(&mut self) {
        self.channel.close().await;
    }

    fn is_open(&self) -> bool {
        self.channel.is_open()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::channel::ChannelConfig;
    use crate::error::{CommandError, Error};

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            read_timeout: Duration::from_millis(100),
            max_ready_polls: 2,
            poll_interval: Duration::from_millis(1),
            ..ChannelConfig::default()
        }
    }

    fn channel(
        mock: tokio_test::io::Mock,
        account: &str,
        password: Option<&str>,
    ) -> CommandChannel<tokio_test::io::Mock> {
        CommandChannel::new(
            PtyChannel::new(mock, fast_config()),
            account,
            password.map(|p| SecretString::from(p.to_string())),
            ElevationPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_echo_and_prompt_are_stripped() {
        let mock = Builder::new()
            .write(b"uname -s\n")
            .read(b"uname -s\r\n")
            .read(b"Linux\r\n[root@web01 ~]# ")
            .build();
        let mut ch = channel(mock, "root", None);

        let response = ch.send_command("uname -s").await.unwrap();
        assert_eq!(response.result, "Linux");
        assert_eq!(response.sent, "uname -s");
        assert!(!response.elevated);
    }

    #[tokio::test]
    async fn test_password_injected_exactly_once() {
        let mock = Builder::new()
            .write(b"sudo id -u\n")
            .read(b"sudo id -u\r\n[sudo] password for deploy: ")
            .write(b"s3cret\n")
            .read(b"\r\n0\r\n[deploy@web01 ~]$ ")
            .build();
        let mut ch = channel(mock, "deploy", Some("s3cret"));

        let response = ch.send_command("id -u").await.unwrap();
        assert_eq!(response.result, "0");
        assert_eq!(response.sent, "sudo id -u");
        assert!(response.elevated);
    }

    #[tokio::test]
    async fn test_second_prompt_fails_without_further_writes() {
        let mock = Builder::new()
            .write(b"sudo id -u\n")
            .read(b"[sudo] password for deploy: ")
            .write(b"wrong\n")
            .read(b"\r\n[sudo] password for deploy: ")
            .build();
        let mut ch = channel(mock, "deploy", Some("wrong"));

        let err = ch.send_command("id -u").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Command(CommandError::SudoAuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_remote_times_out_with_configured_value() {
        let mock = Builder::new()
            .write(b"sleep 600\n")
            .read(b"sleep 600\r\n")
            .wait(Duration::from_secs(1))
            .build();
        let mut ch = channel(mock, "root", None);

        match ch.send_command("sleep 600").await {
            Err(Error::Channel(ChannelError::Timeout(t))) => {
                assert_eq!(t, Duration::from_millis(100))
            }
            other => panic!("expected timeout, got {:?}", other.map(|r| r.result)),
        }
    }

    #[tokio::test]
    async fn test_missing_sudo_falls_back_to_bare_command() {
        let mock = Builder::new()
            .write(b"sudo uname\n")
            .read(b"sudo uname\r\nksh: sudo:  not found\r\n$ ")
            .write(b"uname\n")
            .read(b"uname\r\nAIX\r\n$ ")
            .build();
        let mut ch = channel(mock, "deploy", Some("pw"));

        let response = ch.send_command("uname").await.unwrap();
        assert_eq!(response.result, "AIX");
        assert_eq!(response.sent, "uname");
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_raw_output() {
        let mock = Builder::new()
            .write(b"nohup ./setup.sh &\n")
            .read(b"nohup ./setup.sh &\r\n[1] 4242\r\n")
            .build();
        let mut ch = channel(mock, "root", None);

        let response = ch
            .send_command_with("nohup ./setup.sh &", SendOptions::fire_and_forget())
            .await
            .unwrap();
        assert!(response.result.contains("[1] 4242"));
    }

    #[tokio::test]
    async fn test_prompt_negotiation() {
        let mock = Builder::new()
            .write(format!("{}\n", PROVISION_PROMPT).as_bytes())
            .read(format!("{}\r\n", PROVISION_PROMPT).as_bytes())
            .read(b"[root@web01_provish ~]$ ")
            .write(b"\n")
            .read(b"\r\n[root@web01_provish ~]$ ")
            .build();
        let mut ch = channel(mock, "root", None);

        let prompt = ch.get_and_set_prompt().await;
        assert_eq!(prompt.as_deref(), Some("[root@web01_provish ~]$"));
        assert_eq!(ch.prompt(), Some("[root@web01_provish ~]$"));
    }

    #[tokio::test]
    async fn test_prompt_negotiation_failure_is_not_fatal() {
        let mock = Builder::new()
            .write(format!("{}\n", PROVISION_PROMPT).as_bytes())
            .read(format!("{}\r\n", PROVISION_PROMPT).as_bytes())
            .wait(Duration::from_secs(1))
            .build();
        let mut ch = channel(mock, "root", None);

        assert_eq!(ch.get_and_set_prompt().await, None);
        assert!(ch.is_open());
    }

    #[tokio::test]
    async fn test_close_twice() {
        let mock = Builder::new().build();
        let mut ch = channel(mock, "root", None);
        ch.close().await;
        ch.close().await;
        assert!(!ch.is_open());
        assert!(ch.send_command("id").await.is_err());
    }
}
