//! Per-host entry point: pick the solution for the target and run it.

use std::path::PathBuf;
use std::time::Duration;

use log::info;

use crate::channel::ChannelConfig;
use crate::driver::{ElevationPolicy, SessionBuilder};
use crate::error::Result;
use crate::platform::TargetOs;
use crate::report::{LogSink, Status};
use crate::solution::{AdminExecutor, Fetcher, HostSolutions, SolutionKind, SolutionRunner};
use crate::transport::{Credential, HostKeyVerification};

/// Step name under which a failed run is reported.
pub const FAILURE_STEP: &str = "proxy_fail";

/// One host to provision.
#[derive(Debug, Clone)]
pub struct HostTarget {
    pub host: String,
    /// SSH port, or the administrative share port for Windows batch runs.
    pub port: u16,
    pub account: String,
    pub credential: Credential,
    pub os: TargetOs,
}

impl HostTarget {
    pub fn new(host: impl Into<String>, port: u16, account: impl Into<String>, identity: &str) -> Self {
        Self {
            host: host.into(),
            port,
            account: account.into(),
            credential: Credential::from_identity(identity),
            os: TargetOs::default(),
        }
    }

    pub fn with_os(mut self, os: TargetOs) -> Self {
        self.os = os;
        self
    }

    /// Which solution of the plan applies to this target.
    pub fn solution_kind(&self) -> SolutionKind {
        self.os.solution_kind(self.port)
    }
}

/// Session settings shared by every SSH target.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub connect_timeout: Option<Duration>,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
    pub channel: ChannelConfig,
    pub elevation: ElevationPolicy,
}

/// Runs host plans.
pub struct Provisioner<F, L, E> {
    runner: SolutionRunner<F, L>,
    executor: E,
    session: SessionOptions,
}

impl<F: Fetcher, L: LogSink, E: AdminExecutor> Provisioner<F, L, E> {
    pub fn new(runner: SolutionRunner<F, L>, executor: E) -> Self {
        Self {
            runner,
            executor,
            session: SessionOptions::default(),
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session = options;
        self
    }

    pub fn runner(&self) -> &SolutionRunner<F, L> {
        &self.runner
    }

    /// Run the applicable solution of `plan` against `target`.
    ///
    /// Any failure is reported under [`FAILURE_STEP`] before it is returned.
    pub async fn provision(&self, target: &HostTarget, plan: &HostSolutions) -> Result<()> {
        let result = self.run(target, plan).await;
        if let Err(e) = &result {
            self.runner
                .sink()
                .report(FAILURE_STEP, &e.to_string(), Status::Failed)
                .await;
        }
        result
    }

    async fn run(&self, target: &HostTarget, plan: &HostSolutions) -> Result<()> {
        let kind = target.solution_kind();
        let solution = plan.select(kind)?;
        info!(
            "running {} solution on {}@{}:{} ({})",
            kind, target.account, target.host, target.port, target.os
        );

        match kind {
            SolutionKind::Shell => {
                let mut session = self.session_builder(target).connect().await?;
                self.runner.run_shell(&mut session, solution, target.os).await
            }
            SolutionKind::Batch => {
                self.runner
                    .run_batch(
                        &self.executor,
                        solution,
                        &target.host,
                        &target.account,
                        &target.credential,
                    )
                    .await
            }
        }
    }

    fn session_builder(&self, target: &HostTarget) -> SessionBuilder {
        let mut builder = SessionBuilder::new(&target.host)
            .port(target.port)
            .account(&target.account)
            .credential(target.credential.clone())
            .os(target.os)
            .host_key_verification(self.session.host_key_verification.clone())
            .channel_config(self.session.channel.clone())
            .elevation(self.session.elevation.clone());
        if let Some(timeout) = self.session.connect_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(path) = &self.session.known_hosts_path {
            builder = builder.known_hosts_path(path);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{AuthError, ConfigurationError, Error, ExecutorError};
    use crate::solution::cache::tests::RecordingFetcher;
    use crate::solution::{AdminCommand, RunnerConfig};

    #[derive(Default)]
    struct RecordingSink {
        steps: Mutex<Vec<(String, Status)>>,
    }

    impl LogSink for RecordingSink {
        async fn report(&self, step: &str, _message: &str, status: Status) {
            self.steps.lock().unwrap().push((step.to_string(), status));
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: Mutex<usize>,
    }

    impl AdminExecutor for CountingExecutor {
        async fn execute(&self, _request: &AdminCommand<'_>) -> std::result::Result<String, ExecutorError> {
            *self.calls.lock().unwrap() += 1;
            Ok(String::new())
        }
    }

    fn provisioner(dir: &std::path::Path) -> Provisioner<RecordingFetcher, RecordingSink, CountingExecutor> {
        let runner = SolutionRunner::new(
            RunnerConfig::new(dir, "C:\\agent", "10.0.0.1"),
            RecordingFetcher::default(),
            RecordingSink::default(),
        );
        Provisioner::new(runner, CountingExecutor::default())
    }

    const PLAN: &str = r#"[
        {"type": "batch", "steps": [
            {"type": "commands", "contents": [
                {"name": "cmd", "text": "mkdir C:\\agent"},
                {"name": "run_cmd", "text": "C:\\agent\\setup.bat"}
            ]}
        ]}
    ]"#;

    #[test]
    fn test_solution_selection() {
        let windows = HostTarget::new("h", 445, "Administrator", "pw").with_os(TargetOs::Windows);
        assert_eq!(windows.solution_kind(), SolutionKind::Batch);

        let windows_ssh = HostTarget::new("h", 22, "Administrator", "pw").with_os(TargetOs::Windows);
        assert_eq!(windows_ssh.solution_kind(), SolutionKind::Shell);

        let aix = HostTarget::new("h", 22, "root", "pw").with_os(TargetOs::Aix);
        assert_eq!(aix.solution_kind(), SolutionKind::Shell);
    }

    #[tokio::test]
    async fn test_batch_target_runs_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path());
        let target = HostTarget::new("10.0.0.9", 445, "Administrator", "pw").with_os(TargetOs::Windows);

        provisioner
            .provision(&target, &HostSolutions::from_json(PLAN).unwrap())
            .await
            .unwrap();
        assert_eq!(*provisioner.executor.calls.lock().unwrap(), 2);

        let steps = provisioner.runner.sink().steps.lock().unwrap();
        assert!(steps.iter().all(|(_, status)| *status == Status::Progress));
    }

    #[tokio::test]
    async fn test_missing_solution_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path());
        let target = HostTarget::new("10.0.0.9", 22, "root", "pw");

        let err = provisioner
            .provision(&target, &HostSolutions::from_json(PLAN).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingSolution { .. })
        ));

        let steps = provisioner.runner.sink().steps.lock().unwrap();
        assert_eq!(
            steps.last(),
            Some(&(FAILURE_STEP.to_string(), Status::Failed))
        );
    }

    #[tokio::test]
    async fn test_unreachable_ssh_target_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path()).with_session_options(SessionOptions {
            connect_timeout: Some(Duration::from_millis(500)),
            ..SessionOptions::default()
        });
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = HostTarget::new("127.0.0.1", port, "root", "pw");
        let plan = HostSolutions::from_json(r#"[{"type": "shell", "steps": []}]"#).unwrap();

        let err = provisioner.provision(&target, &plan).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::ConnectError { .. })));
        let steps = provisioner.runner.sink().steps.lock().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].0, FAILURE_STEP);
    }
}
