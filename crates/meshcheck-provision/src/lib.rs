//! meshcheck-provision: container and network backend for meshcheck
//!
//! A thin adapter over a container runtime. It knows how to build an image,
//! start a container from it, exec inside it, read its logs, remove it, and
//! create or destroy the isolated network the fleet lives on. It carries no
//! policy; ordering, retries and error severity are decided by the caller.
//!
//! Two implementations of [`Provisioner`] ship with the crate:
//!
//! - [`DockerCli`] drives a docker-compatible CLI (`docker`, `podman`).
//! - [`fakes::FakeProvisioner`] keeps everything in memory for tests.

pub mod docker;
pub mod error;
pub mod fakes;
pub mod spec;

use async_trait::async_trait;

pub use docker::DockerCli;
pub use error::ProvisionError;
pub use spec::{
    BuildSpec, Environment, ExecOutput, LogOutput, Mount, Network, PortBinding, RestartPolicy,
    RunSpec,
};

/// Result type for provisioning operations
pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

/// Backend that owns environments from creation to removal.
///
/// Guarantees:
/// - `build_and_run` returns only once the container is running.
/// - `exec` reports a non-zero exit through [`ExecOutput::exit_code`], not as
///   an error. Errors mean the command could not be run at all.
/// - Operations on distinct environments may be issued concurrently.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Build the image described by `build` and start a container from it.
    async fn build_and_run(
        &self,
        build: &BuildSpec,
        run: &RunSpec,
        restart: RestartPolicy,
    ) -> ProvisionResult<Environment>;

    /// Run `argv` inside `env`, capturing both streams and the exit code.
    async fn exec(&self, env: &Environment, argv: &[String]) -> ProvisionResult<ExecOutput>;

    /// Fetch everything the container has logged so far.
    async fn fetch_logs(&self, env: &Environment) -> ProvisionResult<LogOutput>;

    /// Stop and remove the container.
    async fn remove(&self, env: &Environment) -> ProvisionResult<()>;

    /// Stop and remove the container called `name`, if there is one.
    ///
    /// For containers whose start was interrupted before an [`Environment`]
    /// came back. A missing container is not an error.
    async fn remove_by_name(&self, name: &str) -> ProvisionResult<()>;

    /// Create an isolated network.
    async fn create_network(&self, name: &str) -> ProvisionResult<Network>;

    /// Destroy a network created by `create_network`.
    async fn close_network(&self, network: &Network) -> ProvisionResult<()>;
}
