//! One-shot administrative command execution for Windows targets.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::error::ExecutorError;

/// Default administrative share.
pub const DEFAULT_SHARE: &str = "ADMIN$";

/// One command to run on a Windows host.
#[derive(Debug, Clone)]
pub struct AdminCommand<'a> {
    /// Command text, or a `put <local> <remote>` directive.
    pub command: &'a str,
    pub host: &'a str,
    pub account: &'a str,
    pub password: &'a SecretString,
    pub share: &'a str,
    /// Run without collecting output.
    pub suppress_output: bool,
}

/// Runs one command and returns its output. Any transport or
/// authentication failure is an error.
pub trait AdminExecutor: Send + Sync {
    fn execute(
        &self,
        request: &AdminCommand<'_>,
    ) -> impl Future<Output = Result<String, ExecutorError>> + Send;
}

/// Shells out to a wmiexec-style helper:
/// `<program> [args..] -share <share> [-nooutput] <account>:<password>@<host> <command>`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the generated ones, e.g. a script path when
    /// `program` is an interpreter.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command_for(&self, request: &AdminCommand<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg("-share").arg(request.share);
        if request.suppress_output {
            cmd.arg("-nooutput");
        }
        cmd.arg(format!(
            "{}:{}@{}",
            request.account,
            request.password.expose_secret(),
            request.host
        ))
        .arg(request.command);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

impl AdminExecutor for ProcessExecutor {
    async fn execute(&self, request: &AdminCommand<'_>) -> Result<String, ExecutorError> {
        debug!(
            "{} on {} via {}: {}",
            request.account,
            request.host,
            self.program.display(),
            request.command
        );

        let output = self
            .command_for(request)
            .output()
            .await
            .map_err(ExecutorError::Spawn)?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(text)
        } else {
            Err(ExecutorError::Failed {
                command: request.command.to_string(),
                code: output.status.code(),
                output: text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(command: &'a str, password: &'a SecretString) -> AdminCommand<'a> {
        AdminCommand {
            command,
            host: "10.0.0.9",
            account: "Administrator",
            password,
            share: DEFAULT_SHARE,
            suppress_output: false,
        }
    }

    #[test]
    fn test_argument_layout() {
        let password = SecretString::from("pw".to_string());
        let mut req = request("dir c:\\", &password);
        req.suppress_output = true;

        let executor = ProcessExecutor::new("python3").with_args(["wmiexec.py"]);
        let cmd = executor.command_for(&req);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "wmiexec.py",
                "-share",
                "ADMIN$",
                "-nooutput",
                "Administrator:pw@10.0.0.9",
                "dir c:\\"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_maps_to_result() {
        let password = SecretString::from("pw".to_string());

        let ok = ProcessExecutor::new("echo");
        let out = ok.execute(&request("hello", &password)).await.unwrap();
        assert!(out.contains("hello"));

        let failing = ProcessExecutor::new("false");
        match failing.execute(&request("x", &password)).await {
            Err(ExecutorError::Failed { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected {:?}", other),
        }

        let missing = ProcessExecutor::new("/nonexistent/provish-helper");
        assert!(matches!(
            missing.execute(&request("x", &password)).await,
            Err(ExecutorError::Spawn(_))
        ));
    }
}
