//! One command's exchange with the remote shell, without any I/O.
//!
//! The exchange is fed every chunk the channel produces and answers with the
//! next [`Action`]. It tracks the elevation password it already injected,
//! the one-time resend without the elevation prefix, and whether the shell
//! has started executing the command at all.
//!
//! ```text
//!   Sent ──password prompt──▶ AwaitingElevation ──output──▶ AwaitingReady
//!    │  ◀──────────resend──────────┐                              │
//!    └──────────── ready ──────────┴──────────────▶ Done ◀── ready┘
//!   any state ── failure signature / second prompt / timeout ──▶ Failed
//! ```

use std::time::Duration;

use log::{debug, trace};

use crate::channel::OutputBuffer;
use crate::channel::classifier::{
    self, ClassifiedEvent, Classification, is_console_ready, is_echo_of, is_elevation_missing,
    normalize, normalize_str, strip_control,
};
use crate::error::{ChannelError, CommandError};

/// How a command is driven to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Wait for the console-ready signature. When false the first chunk of
    /// output completes the command.
    pub wait_for_ready: bool,

    /// Classify output for prompts and failure signatures. When false only
    /// readiness is checked.
    pub check_output: bool,
}

impl SendOptions {
    /// Send and return on the first output.
    pub fn fire_and_forget() -> Self {
        Self {
            wait_for_ready: false,
            check_output: true,
        }
    }

    /// Wait for the prompt but ignore failure signatures.
    pub fn unchecked() -> Self {
        Self {
            wait_for_ready: true,
            check_output: false,
        }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
            check_output: true,
        }
    }
}

/// Where the exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Written; only the echo (or nothing) seen so far.
    Sent,
    /// The elevation password was injected.
    AwaitingElevation,
    /// The command is producing output.
    AwaitingReady,
    /// Completed successfully.
    Done,
    /// Completed with an error.
    Failed,
}

/// What the channel should do next.
#[derive(Debug)]
pub enum Action {
    /// Keep reading.
    Continue,
    /// Write the elevation password followed by a newline.
    InjectPassword,
    /// Write this line (the command without its elevation prefix).
    Resend(String),
    /// The command finished with this output.
    Complete(String),
    /// The command failed.
    Fail(CommandError),
}

/// State machine for a single command.
#[derive(Debug)]
pub struct CommandExchange {
    line: String,
    echo: String,
    echo_in_window: bool,
    fallback: Option<String>,
    elevation_command: String,
    account: String,
    options: SendOptions,
    has_password: bool,
    garbled_echo: bool,
    password_sent: bool,
    state: ExchangeState,
    buffer: OutputBuffer,
}

fn terminated(line: impl Into<String>) -> String {
    let mut line = line.into();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

impl CommandExchange {
    /// Start an exchange for `line` run as `account`.
    pub fn new(
        line: impl Into<String>,
        account: impl Into<String>,
        options: SendOptions,
        search_depth: usize,
    ) -> Self {
        let line = terminated(line);
        Self {
            echo: normalize_str(&line),
            line,
            echo_in_window: true,
            fallback: None,
            elevation_command: String::new(),
            account: account.into(),
            options,
            has_password: false,
            garbled_echo: false,
            password_sent: false,
            state: ExchangeState::Sent,
            buffer: OutputBuffer::new(search_depth),
        }
    }

    /// Allow one resend of `bare` if the shell reports `elevation_command`
    /// as missing.
    pub fn with_elevation_fallback(
        mut self,
        elevation_command: impl Into<String>,
        bare: impl Into<String>,
    ) -> Self {
        self.elevation_command = elevation_command.into();
        self.fallback = Some(terminated(bare));
        self
    }

    /// Whether a password can be injected at a sudo prompt.
    pub fn with_password(mut self, available: bool) -> Self {
        self.has_password = available;
        self
    }

    /// Treat garbled partial echoes as "not yet started".
    pub fn with_garbled_echo(mut self, garbled: bool) -> Self {
        self.garbled_echo = garbled;
        self
    }

    /// The newline-terminated line currently in flight.
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ExchangeState::Done | ExchangeState::Failed)
    }

    /// Whether the password was injected.
    pub fn password_sent(&self) -> bool {
        self.password_sent
    }

    /// Everything received so far, lossily decoded.
    pub fn raw_output(&self) -> String {
        self.buffer.as_str_lossy().into_owned()
    }

    /// Consume one chunk of output and decide what happens next.
    pub fn feed(&mut self, data: &[u8]) -> Action {
        if self.is_finished() {
            return Action::Continue;
        }
        self.buffer.extend(data);

        let classification = self.classify();
        trace!(
            "{:?}: {} ({} bytes)",
            self.state,
            classification.event,
            self.buffer.len()
        );
        self.dispatch(classification)
    }

    /// The read timed out; the exchange fails with `timeout` embedded.
    pub fn timed_out(&mut self, timeout: Duration) -> ChannelError {
        debug!("no console output for {:?} in state {:?}", timeout, self.state);
        self.state = ExchangeState::Failed;
        ChannelError::Timeout(timeout)
    }

    fn classify(&self) -> Classification {
        let mut normalized = normalize(self.buffer.search_tail());
        if self.echo_in_window && !self.echo.is_empty() {
            normalized = normalized.replacen(&self.echo, "", 1);
        }
        let event = if self.options.check_output {
            classifier::classify(&normalized, &self.account)
        } else {
            classifier::classify_readiness(&normalized)
        };
        Classification { event, normalized }
    }

    fn dispatch(&mut self, classification: Classification) -> Action {
        let Classification { event, normalized } = classification;

        match event {
            ClassifiedEvent::PasswordPrompt => {
                if self.password_sent || !self.has_password {
                    return self.fail(CommandError::SudoAuthenticationFailed {
                        output: self.raw_output(),
                    });
                }
                self.password_sent = true;
                self.echo_in_window = false;
                self.buffer.mark();
                self.state = ExchangeState::AwaitingElevation;
                Action::InjectPassword
            }
            ClassifiedEvent::SudoRetry if self.password_sent => {
                self.fail(CommandError::SudoAuthenticationFailed {
                    output: self.raw_output(),
                })
            }
            ClassifiedEvent::SudoRetry => Action::Continue,
            _ if !self.options.wait_for_ready => {
                self.state = ExchangeState::Done;
                Action::Complete(self.raw_output())
            }
            ClassifiedEvent::CommandNotFound
                if self.fallback.is_some()
                    && is_elevation_missing(&normalized, &self.elevation_command) =>
            {
                let Some(bare) = self.fallback.take() else {
                    return Action::Continue;
                };
                debug!(
                    "'{}' not available, resending without it",
                    self.elevation_command.trim()
                );
                self.echo = normalize_str(&bare);
                self.line = bare.clone();
                self.echo_in_window = true;
                self.buffer.mark();
                self.state = ExchangeState::Sent;
                Action::Resend(bare)
            }
            e if e.is_failure() => self.fail(CommandError::RemoteCommandFailed {
                reason: e.describe().to_string(),
                output: self.raw_output(),
            }),
            ClassifiedEvent::Ready => {
                self.state = ExchangeState::Done;
                Action::Complete(self.clean_output())
            }
            _ => {
                self.state = match self.state {
                    ExchangeState::AwaitingElevation if normalized.is_empty() => self.state,
                    ExchangeState::Sent if self.is_still_echo(&normalized) => ExchangeState::Sent,
                    _ => ExchangeState::AwaitingReady,
                };
                Action::Continue
            }
        }
    }

    fn fail(&mut self, error: CommandError) -> Action {
        self.state = ExchangeState::Failed;
        Action::Fail(error)
    }

    /// Output so far is only (part of) the command's own echo.
    fn is_still_echo(&self, normalized: &str) -> bool {
        normalized.is_empty()
            || self.echo.starts_with(normalized)
            || (self.garbled_echo && is_echo_of(&self.echo, normalized))
    }

    /// The window with the echoed command line and the trailing prompt removed.
    fn clean_output(&self) -> String {
        let text = strip_control(self.buffer.window());
        let mut lines: Vec<&str> = text.lines().collect();

        if self.echo_in_window && !self.echo.is_empty() {
            let echo_end = lines
                .iter()
                .position(|line| normalize_str(line).contains(&self.echo));
            if let Some(end) = echo_end {
                lines.drain(..=end);
            }
        }
        if lines
            .last()
            .is_some_and(|last| is_console_ready(&normalize_str(last)))
        {
            lines.pop();
        }

        lines.join("\n").trim().to_string()
    }
}
