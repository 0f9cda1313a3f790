//! Remote command execution with structured result capture.

use std::sync::Arc;
use std::time::Duration;

use meshcheck_provision::{Environment, Provisioner};
use tracing::{debug, warn};

use crate::commands::RemoteCommand;
use crate::error::CommandError;
use crate::metrics::METRICS;

/// Runs commands inside environments and classifies the outcome.
///
/// Never retries; callers own retry policy.
#[derive(Clone)]
pub struct RemoteExecutor {
    provisioner: Arc<dyn Provisioner>,
    timeout: Option<Duration>,
}

impl RemoteExecutor {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            timeout: None,
        }
    }

    /// Bound each command; `None` waits as long as the remote process runs.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `cmd` in `env` and return its raw stdout.
    ///
    /// A non-zero exit is an error carrying the captured stderr; partial
    /// stdout is never handed back as success.
    pub async fn execute(
        &self,
        env: &Environment,
        cmd: &RemoteCommand,
    ) -> Result<String, CommandError> {
        METRICS.inc_commands();
        debug!(target_env = %env.name, command = %cmd, "Executing command");

        let exec = self.provisioner.exec(env, cmd.argv());
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, exec).await {
                Ok(result) => result,
                Err(_) => {
                    METRICS.inc_command_failures();
                    warn!(
                        target_env = %env.name,
                        command = %cmd,
                        secs = limit.as_secs(),
                        "Command timed out"
                    );
                    return Err(CommandError::TimedOut {
                        target: env.name.clone(),
                        command: cmd.to_string(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => exec.await,
        };

        let output = result.map_err(|source| {
            METRICS.inc_command_failures();
            CommandError::Transport {
                target: env.name.clone(),
                command: cmd.to_string(),
                source,
            }
        })?;

        if !output.success() {
            METRICS.inc_command_failures();
            warn!(
                target_env = %env.name,
                command = %cmd,
                exit_code = output.exit_code,
                stdout = %output.stdout,
                stderr = %output.stderr,
                "Command failed"
            );
            return Err(CommandError::NonZeroExit {
                target: env.name.clone(),
                command: cmd.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(output.stdout)
    }

    /// Like [`execute`](Self::execute), for output known to be one line.
    pub async fn execute_line(
        &self,
        env: &Environment,
        cmd: &RemoteCommand,
    ) -> Result<String, CommandError> {
        let stdout = self.execute(env, cmd).await?;
        Ok(trim_trailing_newline(&stdout).to_string())
    }
}

/// Strip one trailing `\n` (and a preceding `\r`).
pub fn trim_trailing_newline(s: &str) -> &str {
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.strip_suffix('\r').unwrap_or(s)
}
