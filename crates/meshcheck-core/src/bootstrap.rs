//! Fleet bootstrap: network, control plane, clients, readiness, enrollment,
//! joins, convergence. Strictly in that order.
//!
//! Every step records what it created in the [`RunContext`] before the next
//! step starts, so a failure anywhere leaves enough behind for teardown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use meshcheck_provision::{
    BuildSpec, Environment, Mount, PortBinding, ProvisionError, RestartPolicy, RunSpec,
};
use tracing::{info, warn};

use crate::config::ConvergenceStrategy;
use crate::context::{ControlPlane, RunContext};
use crate::error::{CommandError, HarnessError, Result, SetupStep};
use crate::fleet::{plan_slots, EnrollmentCredential, FleetMember};
use crate::health::HealthCheck;
use crate::readiness::{retry_until, BackoffPolicy};
use crate::verify::status::view_complete;

/// Drives a [`RunContext`] from empty to a joined, converged fleet.
pub struct FleetBootstrap {
    health: Arc<dyn HealthCheck>,
    /// Base for relative mount paths.
    workdir: PathBuf,
}

impl FleetBootstrap {
    pub fn new(health: Arc<dyn HealthCheck>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            health,
            workdir: workdir.into(),
        }
    }

    /// Run every step. The first error aborts the rest.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        self.create_network(ctx).await?;
        self.start_control_plane(ctx).await?;
        self.start_clients(ctx).await?;
        self.wait_ready(ctx).await?;
        self.enroll(ctx).await?;
        self.join_all(ctx).await?;
        self.converge(ctx).await?;
        info!(fleet_size = ctx.fleet.len(), "Fleet bootstrapped");
        Ok(())
    }

    pub async fn create_network(&self, ctx: &mut RunContext) -> Result<()> {
        let name = ctx.config.network.clone();
        let network = ctx
            .provisioner
            .create_network(&name)
            .await
            .map_err(|source| HarnessError::Provision {
                step: SetupStep::CreateNetwork,
                source,
            })?;
        info!(step = %SetupStep::CreateNetwork, network = %network.name, "Network created");
        ctx.network = Some(network);
        Ok(())
    }

    pub async fn start_control_plane(&self, ctx: &mut RunContext) -> Result<()> {
        let config = ctx.config.clone();
        let cp = &config.control_plane;
        let step = SetupStep::StartControlPlane;

        let mounts = cp
            .mounts
            .iter()
            .map(|raw| {
                Mount::parse(raw, &self.workdir).ok_or_else(|| {
                    HarnessError::Config(format!(
                        "invalid mount {:?}, expected host:container",
                        raw
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let build = BuildSpec::new(cp.dockerfile.clone(), cp.context_dir.clone(), &cp.image);
        let run = RunSpec {
            name: cp.name.clone(),
            network: Some(config.network.clone()),
            mounts,
            port_bindings: vec![PortBinding::new(&cp.container_port, cp.host_port.as_deref())],
            command: cp.command.clone(),
            ..Default::default()
        };

        let env = start_tracked(ctx, &build, &run)
            .await
            .map_err(|source| HarnessError::Provision { step, source })?;

        let Some(host_port) = env.host_port(&cp.container_port).map(str::to_string) else {
            match ctx.provisioner.remove(&env).await {
                Ok(()) => {
                    ctx.pending.remove(&run.name);
                }
                Err(e) => warn!(
                    container = %env.name,
                    error = %e,
                    "Could not remove control plane without port binding"
                ),
            }
            return Err(HarnessError::Provision {
                step,
                source: ProvisionError::PortNotBound {
                    name: env.name.clone(),
                    port: cp.container_port.clone(),
                },
            });
        };

        let control_plane = ControlPlane {
            host_endpoint: format!("localhost:{}", host_port),
            internal_url: format!("http://{}:{}", cp.name, cp.container_port_number()),
            env,
        };
        info!(
            step = %step,
            container = %control_plane.env.name,
            endpoint = %control_plane.host_endpoint,
            "Control plane started"
        );
        ctx.pending.remove(&run.name);
        ctx.control_plane = Some(control_plane);
        Ok(())
    }

    /// Start one client per slot. The first failure is fatal.
    pub async fn start_clients(&self, ctx: &mut RunContext) -> Result<()> {
        let config = ctx.config.clone();
        let clients = &config.clients;

        for slot in plan_slots(&clients.hostname_prefix, &clients.versions, clients.count) {
            let build = BuildSpec::new(
                clients.dockerfile.clone(),
                clients.context_dir.clone(),
                &format!("{}:{}", clients.image_prefix, slot.version),
            )
            .with_build_arg(&clients.version_build_arg, &slot.version);
            let run = RunSpec {
                name: slot.hostname.clone(),
                network: Some(config.network.clone()),
                command: clients.command.clone(),
                ..Default::default()
            };

            let env = start_tracked(ctx, &build, &run)
                .await
                .map_err(|source| HarnessError::Provision {
                    step: SetupStep::StartClient,
                    source,
                })?;
            info!(
                step = %SetupStep::StartClient,
                hostname = %slot.hostname,
                version = %slot.version,
                "Client started"
            );

            ctx.fleet.insert(FleetMember {
                hostname: slot.hostname,
                version: slot.version,
                slot: slot.slot,
                env,
            })?;
            ctx.pending.remove(&run.name);
        }
        Ok(())
    }

    /// Block until the control plane's health endpoint answers 200.
    pub async fn wait_ready(&self, ctx: &mut RunContext) -> Result<()> {
        let url = control_plane(ctx)?.health_url(&ctx.config.control_plane.health_path);
        let policy = BackoffPolicy::from(&ctx.config.readiness);

        let report = retry_until("control plane", &policy, ctx.config.readiness_deadline(), || {
            self.health.check(&url)
        })
        .await?;
        info!(
            step = %SetupStep::WaitReady,
            attempts = report.attempts,
            url = %url,
            "Control plane healthy"
        );
        Ok(())
    }

    /// Create the namespace (if needed) and fetch a reusable credential.
    pub async fn enroll(&self, ctx: &mut RunContext) -> Result<()> {
        let cp_env = control_plane(ctx)?.env.clone();
        let commands = ctx.control_plane_commands();

        match ctx.executor.execute(&cp_env, &commands.create_namespace()).await {
            Ok(_) => info!(
                step = %SetupStep::Enroll,
                namespace = %commands.namespace(),
                "Namespace created"
            ),
            Err(e) if already_exists(&e) => info!(
                step = %SetupStep::Enroll,
                namespace = %commands.namespace(),
                "Namespace already exists"
            ),
            Err(source) => return Err(HarnessError::Enrollment { source }),
        }

        let raw = ctx
            .executor
            .execute_line(&cp_env, &commands.create_credential())
            .await
            .map_err(|source| HarnessError::Enrollment { source })?;
        let credential = EnrollmentCredential::new(&raw).ok_or_else(|| HarnessError::Parse {
            subject: "enrollment credential".to_string(),
            input: raw.clone(),
            reason: "expected a single token".to_string(),
        })?;
        info!(step = %SetupStep::Enroll, "Enrollment credential issued");
        ctx.credential = Some(credential);
        Ok(())
    }

    /// Join every fleet member to the control plane.
    pub async fn join_all(&self, ctx: &mut RunContext) -> Result<()> {
        let ctx: &RunContext = ctx;
        let login_server = control_plane(ctx)?.internal_url.clone();
        let credential = ctx.credential.as_ref().ok_or_else(|| {
            HarnessError::Config("join attempted before a credential was issued".to_string())
        })?;
        let commands = ctx.client_commands();

        let login_server = &login_server;
        let commands = &commands;
        stream::iter(ctx.fleet.members())
            .map(move |member| async move {
                let cmd = commands.join(login_server, credential, &member.hostname);
                ctx.executor
                    .execute(&member.env, &cmd)
                    .await
                    .map_err(|source| HarnessError::Join {
                        hostname: member.hostname.clone(),
                        source,
                    })?;
                info!(step = %SetupStep::Join, hostname = %member.hostname, "Joined");
                Ok::<(), HarnessError>(())
            })
            .buffer_unordered(ctx.config.verification.max_parallel.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Wait until every node sees the whole fleet.
    pub async fn converge(&self, ctx: &mut RunContext) -> Result<()> {
        let ctx: &RunContext = ctx;
        let cfg = &ctx.config.convergence;
        match cfg.strategy {
            ConvergenceStrategy::Sleep => {
                info!(
                    step = %SetupStep::Converge,
                    secs = cfg.settle_secs,
                    "Waiting for membership to settle"
                );
                tokio::time::sleep(Duration::from_secs(cfg.settle_secs)).await;
            }
            ConvergenceStrategy::Poll => {
                let report = retry_until(
                    "fleet membership",
                    &BackoffPolicy::from(cfg),
                    Duration::from_secs(cfg.poll_deadline_secs),
                    || fleet_converged(ctx),
                )
                .await
                .map_err(|e| HarnessError::ConvergenceTimeout(Box::new(e)))?;
                info!(step = %SetupStep::Converge, attempts = report.attempts, "Fleet converged");
            }
        }
        Ok(())
    }
}

/// Start a container, keeping its name in `ctx.pending` until the caller
/// has recorded the environment.
///
/// A start that returns an error leaves nothing behind. A start dropped
/// mid-await (run deadline) leaves the name for teardown.
async fn start_tracked(
    ctx: &mut RunContext,
    build: &BuildSpec,
    run: &RunSpec,
) -> std::result::Result<Environment, ProvisionError> {
    ctx.pending.insert(run.name.clone());
    let result = ctx
        .provisioner
        .build_and_run(build, run, RestartPolicy::ephemeral())
        .await;
    if result.is_err() {
        ctx.pending.remove(&run.name);
    }
    result
}

fn control_plane(ctx: &RunContext) -> Result<&ControlPlane> {
    ctx.control_plane
        .as_ref()
        .ok_or_else(|| HarnessError::Config("control plane is not running".to_string()))
}

/// A create that failed only because the record is already there.
fn already_exists(err: &CommandError) -> bool {
    match err {
        CommandError::NonZeroExit { stdout, stderr, .. } => {
            let needle = "already exists";
            stderr.to_ascii_lowercase().contains(needle)
                || stdout.to_ascii_lowercase().contains(needle)
        }
        _ => false,
    }
}

/// `Ok` once every member's status lists every hostname.
async fn fleet_converged(ctx: &RunContext) -> std::result::Result<(), String> {
    stream::iter(ctx.fleet.members())
        .map(|member| view_complete(ctx, member))
        .buffer_unordered(ctx.config.verification.max_parallel.max(1))
        .try_collect::<Vec<()>>()
        .await
        .map(|_| ())
}
