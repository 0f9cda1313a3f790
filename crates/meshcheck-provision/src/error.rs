//! Error types for meshcheck-provision

use thiserror::Error;

/// Errors that can occur while driving the container backend
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Container CLI binary could not be spawned
    #[error("container CLI `{0}` is not installed or not in PATH")]
    CliNotFound(String),

    /// Image build failed
    #[error("image build for {image} failed: {message}")]
    Build { image: String, message: String },

    /// Container could not be started
    #[error("container {name} failed to start: {message}")]
    Start { name: String, message: String },

    /// A published port could not be resolved on the host
    #[error("container {name} has no host binding for {port}")]
    PortNotBound { name: String, port: String },

    /// Exec transport failure (not a non-zero exit of the command itself)
    #[error("exec in {name} failed: {message}")]
    Exec { name: String, message: String },

    /// Log retrieval failed
    #[error("fetching logs of {name} failed: {message}")]
    Logs { name: String, message: String },

    /// Container removal failed
    #[error("removing {name} failed: {message}")]
    Remove { name: String, message: String },

    /// Network create or destroy failed
    #[error("network {name}: {message}")]
    Network { name: String, message: String },

    /// Backend operation exceeded its time limit
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_names_image() {
        let err = ProvisionError::Build {
            image: "meshcheck-client:1.14.3".to_string(),
            message: "no such file: Dockerfile.tailscale".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("meshcheck-client:1.14.3"));
        assert!(msg.contains("Dockerfile.tailscale"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ProvisionError = io.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }
}
