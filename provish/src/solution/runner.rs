//! Drives an execution solution to completion.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use secrecy::ExposeSecret;
use tokio::time::sleep;

use super::cache::{DependencyCache, Fetcher};
use super::executor::{AdminCommand, AdminExecutor, DEFAULT_SHARE};
use super::model::{Content, ExecutionSolution, StepKind};
use crate::channel::classifier::{is_setup_done, is_setup_failed, parse_err_msg};
use crate::driver::{Driver, SendOptions};
use crate::error::{CommandError, ConfigurationError, Error, Result};
use crate::platform::TargetOs;
use crate::report::{LogSink, Status};
use crate::transport::Credential;

/// Port of the artifact mirror that serves the dependency cache.
pub const DEFAULT_MIRROR_PORT: u16 = 17981;

/// Where artifacts come from and go to.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Local dependency cache directory.
    pub cache_dir: PathBuf,

    /// Destination directory on the target host.
    pub remote_dir: String,

    /// Host of the artifact mirror, as reachable from the target.
    pub mirror_host: String,

    /// Port of the artifact mirror.
    pub mirror_port: u16,

    /// Pause after the fire-and-forget shell command before closing.
    pub settle_delay: Duration,

    /// Administrative share used on Windows targets.
    pub share: String,
}

impl RunnerConfig {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        remote_dir: impl Into<String>,
        mirror_host: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            remote_dir: remote_dir.into(),
            mirror_host: mirror_host.into(),
            mirror_port: DEFAULT_MIRROR_PORT,
            settle_delay: Duration::from_secs(5),
            share: DEFAULT_SHARE.to_string(),
        }
    }
}

/// Join fragments into one AND-chained invocation of `shell` with stderr
/// merged into stdout.
pub fn wrap_compound(shell: &str, fragments: &[String]) -> String {
    format!("{} -c 'exec 2>&1 && {} '\n", shell, fragments.join(" && "))
}

/// Runs shell and batch solutions.
pub struct SolutionRunner<F, L> {
    config: RunnerConfig,
    cache: DependencyCache,
    fetcher: F,
    sink: L,
}

impl<F: Fetcher, L: LogSink> SolutionRunner<F, L> {
    pub fn new(config: RunnerConfig, fetcher: F, sink: L) -> Self {
        Self {
            cache: DependencyCache::new(&config.cache_dir),
            config,
            fetcher,
            sink,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn sink(&self) -> &L {
        &self.sink
    }

    /// Shell fragment that pulls `name` from the mirror into the remote
    /// destination directory.
    pub fn push_command(&self, name: &str) -> String {
        let dir = self.config.remote_dir.trim_end_matches('/');
        format!(
            "mkdir -p {dir} && curl -fsS -o {dir}/{name} http://{host}:{port}/{name}",
            host = self.config.mirror_host,
            port = self.config.mirror_port,
        )
    }

    /// Build the single compound command for a shell solution.
    ///
    /// Missing dependencies are downloaded into the local cache first.
    pub async fn compose_shell_command(
        &self,
        solution: &ExecutionSolution,
        os: TargetOs,
    ) -> Result<String> {
        let mut fragments = Vec::new();
        for step in &solution.steps {
            match &step.kind {
                StepKind::Dependencies => {
                    for content in &step.contents {
                        self.sync_dependency("execute_shell_solution", content)
                            .await?;
                        fragments.push(self.push_command(&content.name));
                    }
                }
                StepKind::Commands => {
                    fragments.extend(step.contents.iter().map(|c| c.text.clone()));
                }
                StepKind::Unknown(kind) => {
                    self.sink
                        .report(
                            "execute_shell_solution",
                            &format!("unknown step type -> {}", kind),
                            Status::Progress,
                        )
                        .await;
                }
            }
        }
        if fragments.is_empty() {
            return Ok(String::new());
        }
        Ok(wrap_compound(os.shell(), &fragments))
    }

    /// Send the compound command without waiting for the prompt, let it
    /// settle, and close the driver.
    pub async fn run_shell<D: Driver>(
        &self,
        driver: &mut D,
        solution: &ExecutionSolution,
        os: TargetOs,
    ) -> Result<()> {
        let result = self.send_compound(driver, solution, os).await;
        driver.close().await;

        if let Err(e) = &result {
            self.sink
                .report("execute_shell_solution", &e.to_string(), Status::Failed)
                .await;
        }
        result
    }

    async fn send_compound<D: Driver>(
        &self,
        driver: &mut D,
        solution: &ExecutionSolution,
        os: TargetOs,
    ) -> Result<()> {
        let command = self.compose_shell_command(solution, os).await?;
        if command.is_empty() {
            self.sink
                .report("execute_shell_solution", "nothing to run", Status::Progress)
                .await;
            return Ok(());
        }

        self.sink
            .report("send_cmd", command.trim_end(), Status::Progress)
            .await;
        let response = driver
            .send_command_with(&command, SendOptions::fire_and_forget())
            .await?;
        debug!("first output: {}", response.raw_result.trim_end());

        if let Some(line) = response.raw_result.lines().find(|l| is_setup_failed(l)) {
            let reason = parse_err_msg(line).unwrap_or(line).trim().to_string();
            return Err(CommandError::RemoteCommandFailed {
                reason,
                output: response.raw_result,
            }
            .into());
        }
        if is_setup_done(&response.raw_result) {
            info!("setup reported success on first output");
        }

        if !self.config.settle_delay.is_zero() {
            sleep(self.config.settle_delay).await;
        }
        Ok(())
    }

    /// Run each content as its own administrative command, stopping at the
    /// first failure.
    pub async fn run_batch<E: AdminExecutor>(
        &self,
        executor: &E,
        solution: &ExecutionSolution,
        host: &str,
        account: &str,
        credential: &Credential,
    ) -> Result<()> {
        // A key credential, or a password that is really a key file path.
        let password = match credential.elevation_password() {
            Some(password) if !Path::new(password.expose_secret()).is_file() => password,
            _ => {
                let e = ConfigurationError::KeyFileCredential;
                self.sink
                    .report("execute_batch_solution", &e.to_string(), Status::Failed)
                    .await;
                return Err(e.into());
            }
        };

        for step in &solution.steps {
            for content in &step.contents {
                let command = match &step.kind {
                    StepKind::Dependencies => {
                        let path = self.sync_dependency("execute_batch_solution", content).await?;
                        format!("put {} {}", path.display(), self.config.remote_dir)
                    }
                    StepKind::Commands => content.text.clone(),
                    StepKind::Unknown(kind) => {
                        self.sink
                            .report(
                                "execute_batch_solution",
                                &format!("unknown step type -> {}", kind),
                                Status::Progress,
                            )
                            .await;
                        continue;
                    }
                };

                self.sink.report("send_cmd", &command, Status::Progress).await;
                let request = AdminCommand {
                    command: &command,
                    host,
                    account,
                    password,
                    share: &self.config.share,
                    suppress_output: content.name == "run_cmd",
                };
                match executor.execute(&request).await {
                    Ok(output) => info!("{}: {}", content.name, output.trim_end()),
                    Err(e) => {
                        self.sink
                            .report(
                                "execute_batch_solution",
                                &format!("execute {} failed, err_msg -> {}", command, e),
                                Status::Failed,
                            )
                            .await;
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Make sure a dependency is in the local cache and return its path.
    async fn sync_dependency(&self, step: &str, content: &Content) -> Result<PathBuf> {
        match self
            .cache
            .ensure(&self.fetcher, &content.name, &content.text)
            .await
        {
            Ok(true) => {
                self.sink
                    .report(
                        step,
                        &format!("file -> {} synced from {}", content.name, content.text),
                        Status::Progress,
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                let e = Error::from(e);
                self.sink.report(step, &e.to_string(), Status::Failed).await;
                return Err(e);
            }
        }
        Ok(self.cache.path_of(&content.name))
    }
}
