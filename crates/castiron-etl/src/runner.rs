//! Running transformation commands.
//!
//! A command is a shell line from a processor config. It runs under
//! `/bin/sh -c` in the file's scratch directory with a cleared environment:
//! only the destination settings, the local file name and the worker's
//! `PATH` are visible to it.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::DestinationConfig;
use crate::error::{EtlError, EtlResult};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Variables handed to a command, sorted by name.
pub type CommandEnv = BTreeMap<String, String>;

/// Build the fixed environment for transforming `local_file`.
pub fn command_env(destination: &DestinationConfig, local_file: &Path) -> CommandEnv {
    CommandEnv::from([
        ("DATABASE_HOST".to_string(), destination.host.clone()),
        ("DATABASE_PASSWORD".to_string(), destination.password.clone()),
        ("DATABASE_PORT".to_string(), destination.port.to_string()),
        ("DATABASE_TABLE".to_string(), destination.table.clone()),
        ("DATABASE_USER".to_string(), destination.user.clone()),
        (
            "ETL_FILENAME".to_string(),
            local_file.to_string_lossy().into_owned(),
        ),
    ])
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// `None` when killed by a signal or by the timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandStatus {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes one shell command and waits for it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `shell` in `workdir` with exactly `env`. Combined stdout and
    /// stderr are written to `output` when given, discarded otherwise.
    ///
    /// A command that cannot be started yields [`EtlError::CommandLaunch`].
    async fn run(
        &self,
        shell: &str,
        env: &CommandEnv,
        workdir: &Path,
        output: Option<&Path>,
    ) -> EtlResult<CommandStatus>;
}

/// [`CommandRunner`] backed by a real shell process
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell_path: PathBuf,
    search_path: Option<OsString>,
    timeout: Option<Duration>,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self {
            shell_path: PathBuf::from(DEFAULT_SHELL),
            search_path: std::env::var_os("PATH"),
            timeout: None,
        }
    }

    /// Kill commands still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shell(mut self, shell_path: impl Into<PathBuf>) -> Self {
        self.shell_path = shell_path.into();
        self
    }

    fn output_stdio(output: Option<&Path>) -> EtlResult<(Stdio, Stdio)> {
        match output {
            Some(path) => {
                let stdout = std::fs::File::create(path)?;
                let stderr = stdout.try_clone()?;
                Ok((Stdio::from(stdout), Stdio::from(stderr)))
            }
            None => Ok((Stdio::null(), Stdio::null())),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        shell: &str,
        env: &CommandEnv,
        workdir: &Path,
        output: Option<&Path>,
    ) -> EtlResult<CommandStatus> {
        let (stdout, stderr) = Self::output_stdio(output)?;

        let mut command = Command::new(&self.shell_path);
        command
            .arg("-c")
            .arg(shell)
            .env_clear()
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        if let Some(path) = &self.search_path {
            command.env("PATH", path);
        }
        command.envs(env);

        let mut child = command.spawn().map_err(EtlError::CommandLaunch)?;
        debug!(pid = ?child.id(), shell, "Command started");

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs_f64(), shell, "Command timed out, killing it");
                    child.kill().await?;
                    return Ok(CommandStatus {
                        exit_code: None,
                        timed_out: true,
                    });
                }
            },
            None => child.wait().await?,
        };

        Ok(CommandStatus {
            exit_code: status.code(),
            timed_out: false,
        })
    }
}
