//! Run lifecycle: setup, verification, outcome, diagnostics, teardown.
//!
//! ```text
//! Setup -> Running -> Outcome -> Diagnostics (failed runs only) -> Teardown -> Done
//! ```
//!
//! A fatal setup error jumps straight to Outcome. Teardown always runs and
//! never fails the run.

use std::fmt;

use chrono::Utc;
use tracing::{error, warn, Instrument};

use crate::bootstrap::FleetBootstrap;
use crate::context::RunContext;
use crate::diagnostics::capture_failure_logs;
use crate::error::{HarnessError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::outcome::{write_report, RunReport, SetupFailure};
use crate::verify::{self, CheckReport};

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunPhase {
    Setup,
    Running,
    Outcome,
    Diagnostics,
    Teardown,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Setup => "setup",
            RunPhase::Running => "running",
            RunPhase::Outcome => "outcome",
            RunPhase::Diagnostics => "diagnostics",
            RunPhase::Teardown => "teardown",
            RunPhase::Done => "done",
        })
    }
}

/// Owns the order of a whole run.
pub struct RunLifecycle {
    bootstrap: FleetBootstrap,
}

impl RunLifecycle {
    pub fn new(bootstrap: FleetBootstrap) -> Self {
        Self { bootstrap }
    }

    /// Execute one complete run against `ctx` and return its report.
    ///
    /// When the run leaves this function every environment it created has
    /// been asked to go away, whatever happened before.
    pub async fn run(&self, ctx: &mut RunContext) -> RunReport {
        let span = obs::run_span(&ctx.run_id);
        self.run_phases(ctx).instrument(span).await
    }

    async fn run_phases(&self, ctx: &mut RunContext) -> RunReport {
        let mut report = RunReport::new(&ctx.run_id);
        obs::emit_run_started(&ctx.run_id, ctx.config.clients.count, &ctx.config.clients.versions);

        let deadline = ctx.config.run_deadline();
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.setup_and_verify(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(HarnessError::DeadlineExceeded {
                    secs: limit.as_secs(),
                }),
            },
            None => self.setup_and_verify(ctx).await,
        };

        report.fleet_size = ctx.fleet.len();
        report.version_mix = ctx
            .fleet
            .version_mix()
            .into_iter()
            .map(|(version, n)| (version.to_string(), n))
            .collect();

        enter(ctx, RunPhase::Outcome);
        match result {
            Ok(checks) => report.checks = checks,
            Err(e) => {
                error!(step = ?e.setup_step(), error = %e, "Run aborted");
                report.setup_error = Some(SetupFailure::from(&e));
            }
        }

        if !report.passed() {
            enter(ctx, RunPhase::Diagnostics);
            let capture = capture_failure_logs(ctx).await;
            for e in &capture.errors {
                obs::emit_cleanup_failed("log capture", e);
            }
            report
                .log_files
                .extend(capture.files.iter().map(|p| p.display().to_string()));
            report.cleanup_errors.extend(capture.errors);
        }

        enter(ctx, RunPhase::Teardown);
        report.cleanup_errors.extend(teardown(ctx).await);

        enter(ctx, RunPhase::Done);
        report.finished_at = Some(Utc::now());
        obs::emit_run_finished(
            &ctx.run_id,
            report.duration_ms().unwrap_or(0),
            report.passed(),
            report.failed_subcases().len(),
        );
        METRICS.flush();

        if let Some(path) = &ctx.config.diagnostics.report_path {
            if let Err(e) = write_report(path, &report) {
                warn!(path = %path.display(), error = %e, "Could not write run report");
            }
        }
        report
    }

    async fn setup_and_verify(&self, ctx: &mut RunContext) -> Result<Vec<CheckReport>> {
        enter(ctx, RunPhase::Setup);
        self.bootstrap.run(ctx).await?;

        enter(ctx, RunPhase::Running);
        Ok(verify::run_suite(ctx).await)
    }
}

fn enter(ctx: &RunContext, phase: RunPhase) {
    obs::emit_phase(&ctx.run_id, &phase);
}

/// Remove every client, then the control plane, then the network.
///
/// Containers whose start never returned are removed by name before the
/// control plane.
///
/// Failures are logged and returned, never raised.
pub async fn teardown(ctx: &mut RunContext) -> Vec<String> {
    let mut failures = Vec::new();
    let provisioner = ctx.provisioner.clone();

    for member in ctx.fleet.drain() {
        if let Err(e) = provisioner.remove(&member.env).await {
            failures.push(cleanup_failed(&member.hostname, &e));
        }
    }
    for name in std::mem::take(&mut ctx.pending) {
        if let Err(e) = provisioner.remove_by_name(&name).await {
            failures.push(cleanup_failed(&name, &e));
        }
    }
    if let Some(cp) = ctx.control_plane.take() {
        if let Err(e) = provisioner.remove(&cp.env).await {
            failures.push(cleanup_failed(&cp.env.name, &e));
        }
    }
    if let Some(network) = ctx.network.take() {
        if let Err(e) = provisioner.close_network(&network).await {
            failures.push(cleanup_failed(&network.name, &e));
        }
    }
    ctx.credential = None;
    failures
}

fn cleanup_failed(what: &str, err: &dyn fmt::Display) -> String {
    METRICS.inc_cleanup_failures();
    obs::emit_cleanup_failed(what, err);
    HarnessError::Cleanup(format!("{}: {}", what, err)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(RunPhase::Outcome < RunPhase::Diagnostics);
        assert!(RunPhase::Diagnostics < RunPhase::Teardown);
        assert_eq!(RunPhase::Teardown.to_string(), "teardown");
    }
}
