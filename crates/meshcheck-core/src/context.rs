//! Per-run state, owned by the lifecycle and lent to every component.

use std::collections::BTreeSet;
use std::sync::Arc;

use meshcheck_provision::{Environment, Network, Provisioner};
use uuid::Uuid;

use crate::commands::{ClientCommands, ControlPlaneCommands};
use crate::config::HarnessConfig;
use crate::executor::RemoteExecutor;
use crate::fleet::{EnrollmentCredential, Fleet};

/// The control-plane environment and how to reach it.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    pub env: Environment,
    /// Reachable from the harness host, e.g. `localhost:8080`.
    pub host_endpoint: String,
    /// Reachable from fleet members, e.g. `http://headscale:8080`.
    pub internal_url: String,
}

impl ControlPlane {
    /// Health URL as seen from the harness host.
    pub fn health_url(&self, path: &str) -> String {
        format!("http://{}{}", self.host_endpoint, path)
    }
}

/// Everything one run creates.
///
/// Bootstrap fills it in step by step, so after a fatal setup error the
/// lifecycle still knows exactly what to tear down.
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<HarnessConfig>,
    pub provisioner: Arc<dyn Provisioner>,
    pub executor: RemoteExecutor,
    pub network: Option<Network>,
    pub control_plane: Option<ControlPlane>,
    pub fleet: Fleet,
    pub credential: Option<EnrollmentCredential>,
    /// Container names handed to the provisioner but not yet recorded
    /// above. Teardown removes these by name.
    pub pending: BTreeSet<String>,
}

impl RunContext {
    pub fn new(config: Arc<HarnessConfig>, provisioner: Arc<dyn Provisioner>) -> Self {
        let executor =
            RemoteExecutor::new(provisioner.clone()).with_timeout(config.command_timeout());
        Self {
            run_id: Uuid::new_v4().to_string(),
            config,
            provisioner,
            executor,
            network: None,
            control_plane: None,
            fleet: Fleet::new(),
            credential: None,
            pending: BTreeSet::new(),
        }
    }

    pub fn control_plane_commands(&self) -> ControlPlaneCommands {
        ControlPlaneCommands::new(&self.config.control_plane)
    }

    pub fn client_commands(&self) -> ClientCommands {
        ClientCommands::new(&self.config.clients.cli)
    }
}
