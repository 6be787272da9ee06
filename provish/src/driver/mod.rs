//! Command execution over an authenticated interactive shell.
//!
//! [`Session`] owns the SSH transport and a [`CommandChannel`] bound to its
//! shell. Both implement [`Driver`], which is what the solution runner
//! talks to.

mod builder;
mod command;
mod elevation;
mod exchange;
pub(crate) mod response;
mod session;

pub use builder::SessionBuilder;
pub use command::{CommandChannel, PROMPT_MARKER, PROVISION_PROMPT};
pub use elevation::{ElevatedCommand, ElevationPolicy};
pub use exchange::{Action, CommandExchange, ExchangeState, SendOptions};
pub use response::Response;
pub use session::{Session, ShellStream};

use std::future::Future;

use crate::error::Result;

/// Something that runs commands on a remote shell.
pub trait Driver: Send {
    /// Send a command with explicit options.
    fn send_command_with(
        &mut self,
        command: &str,
        options: SendOptions,
    ) -> impl Future<Output = Result<Response>> + Send;

    /// Send a command, wait for the prompt and check its output.
    fn send_command(&mut self, command: &str) -> impl Future<Output = Result<Response>> + Send {
        self.send_command_with(command, SendOptions::default())
    }

    /// Send multiple commands sequentially, stopping at the first failure.
    fn send_commands(
        &mut self,
        commands: &[&str],
    ) -> impl Future<Output = Result<Vec<Response>>> + Send {
        async move {
            let mut responses = Vec::with_capacity(commands.len());
            for cmd in commands {
                responses.push(self.send_command(cmd).await?);
            }
            Ok(responses)
        }
    }

    /// Close the shell. Safe to call repeatedly.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Check if the shell is still usable.
    fn is_open(&self) -> bool;
}
