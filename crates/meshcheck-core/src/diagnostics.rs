//! Log capture for failed runs.
//!
//! Runs strictly before teardown; removal destroys the logs.

use std::path::{Path, PathBuf};

use meshcheck_provision::{Environment, Provisioner};
use tracing::info;

use crate::context::RunContext;
use crate::error::{HarnessError, Result};

/// Paths of the two log files for `env_name` under `dir`.
pub fn log_paths(dir: &Path, env_name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.stdout.log", env_name)),
        dir.join(format!("{}.stderr.log", env_name)),
    )
}

/// Fetch `env`'s logs and write them to `dir`, creating it if missing.
pub async fn save_logs(
    provisioner: &dyn Provisioner,
    env: &Environment,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let logs = provisioner
        .fetch_logs(env)
        .await
        .map_err(|e| HarnessError::Cleanup(format!("fetch logs of {}: {}", env.name, e)))?;

    tokio::fs::create_dir_all(dir).await?;
    let (stdout_path, stderr_path) = log_paths(dir, &env.name);
    tokio::fs::write(&stdout_path, logs.stdout.as_bytes()).await?;
    tokio::fs::write(&stderr_path, logs.stderr.as_bytes()).await?;

    info!(container = %env.name, dir = %dir.display(), "Saved logs");
    Ok(vec![stdout_path, stderr_path])
}

/// What a capture pass wrote and what it could not.
#[derive(Debug, Default)]
pub struct Capture {
    pub files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Save the control plane's logs, and the clients' when configured.
///
/// Never fails; every problem is collected in [`Capture::errors`].
pub async fn capture_failure_logs(ctx: &RunContext) -> Capture {
    let dir = &ctx.config.diagnostics.log_dir;
    let mut envs: Vec<&Environment> = Vec::new();
    if let Some(cp) = &ctx.control_plane {
        envs.push(&cp.env);
    }
    if ctx.config.diagnostics.capture_client_logs {
        envs.extend(ctx.fleet.members().map(|m| &m.env));
    }

    let mut capture = Capture::default();
    for env in envs {
        match save_logs(ctx.provisioner.as_ref(), env, dir).await {
            Ok(files) => capture.files.extend(files),
            Err(e) => capture.errors.push(e.to_string()),
        }
    }
    capture
}
