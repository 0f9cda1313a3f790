//! Error taxonomy for a harness run.
//!
//! Setup failures (`Provision`, `ReadinessTimeout`, `Enrollment`, `Join`,
//! `ConvergenceTimeout`) abort the run. `Command` and `Parse` are scoped to
//! a single verification sub-case. `Cleanup` is only ever logged.

use meshcheck_provision::ProvisionError;
use std::fmt;

/// Bootstrap step a fatal error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    CreateNetwork,
    StartControlPlane,
    StartClient,
    WaitReady,
    Enroll,
    Join,
    Converge,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::CreateNetwork => "create-network",
            SetupStep::StartControlPlane => "start-control-plane",
            SetupStep::StartClient => "start-client",
            SetupStep::WaitReady => "wait-ready",
            SetupStep::Enroll => "enroll",
            SetupStep::Join => "join",
            SetupStep::Converge => "converge",
        };
        f.write_str(name)
    }
}

/// A remote command that did not complete successfully.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("`{command}` on {target} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        target: String,
        command: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` on {target} could not be executed: {source}")]
    Transport {
        target: String,
        command: String,
        #[source]
        source: ProvisionError,
    },

    #[error("`{command}` on {target} timed out after {secs}s")]
    TimedOut {
        target: String,
        command: String,
        secs: u64,
    },
}

/// Errors produced by a harness run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("{step}: provisioning failed: {source}")]
    Provision {
        step: SetupStep,
        #[source]
        source: ProvisionError,
    },

    #[error("{target} not ready after {attempts} attempt(s) in {elapsed_ms}ms: {last_error}")]
    ReadinessTimeout {
        target: String,
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("enrollment failed: {source}")]
    Enrollment {
        #[source]
        source: CommandError,
    },

    #[error("{hostname} failed to join: {source}")]
    Join {
        hostname: String,
        #[source]
        source: CommandError,
    },

    #[error("fleet did not converge: {0}")]
    ConvergenceTimeout(Box<HarnessError>),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unexpected output from {subject}: {reason} (got {input:?})")]
    Parse {
        subject: String,
        input: String,
        reason: String,
    },

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run exceeded its {secs}s deadline")]
    DeadlineExceeded { secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Setup step the error aborted, if it is a bootstrap failure.
    pub fn setup_step(&self) -> Option<SetupStep> {
        match self {
            HarnessError::Provision { step, .. } => Some(*step),
            HarnessError::ReadinessTimeout { .. } => Some(SetupStep::WaitReady),
            HarnessError::Enrollment { .. } => Some(SetupStep::Enroll),
            HarnessError::Join { .. } => Some(SetupStep::Join),
            HarnessError::ConvergenceTimeout(_) => Some(SetupStep::Converge),
            _ => None,
        }
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_carries_stderr() {
        let err = CommandError::NonZeroExit {
            target: "tailscale-1-14-3-0".to_string(),
            command: "tailscale up".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "invalid key: expired".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tailscale-1-14-3-0"));
        assert!(msg.contains("expired"));
    }

    #[test]
    fn test_join_error_names_step_and_host() {
        let err = HarnessError::Join {
            hostname: "tailscale-1-12-3-1".to_string(),
            source: CommandError::TimedOut {
                target: "tailscale-1-12-3-1".to_string(),
                command: "tailscale up".to_string(),
                secs: 30,
            },
        };
        assert_eq!(err.setup_step(), Some(SetupStep::Join));
        assert!(err.to_string().contains("tailscale-1-12-3-1 failed to join"));
    }

    #[test]
    fn test_provision_error_display_has_step() {
        let err = HarnessError::Provision {
            step: SetupStep::StartClient,
            source: ProvisionError::Start {
                name: "tailscale-1-14-3-2".to_string(),
                message: "boom".to_string(),
            },
        };
        assert!(err.to_string().starts_with("start-client:"));
    }

    #[test]
    fn test_verification_errors_have_no_setup_step() {
        let err = HarnessError::Parse {
            subject: "n".to_string(),
            input: "x".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(err.setup_step(), None);
    }
}
