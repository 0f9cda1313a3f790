//! Structured observability hooks for run lifecycle events.
//!
//! - A run-scoped tracing span every log line of a run is attached to
//! - Emission functions for start, phase transitions, sub-case results,
//!   cleanup failures and finish

use tracing::{info, warn};

/// Span tagged with the run_id; attach with `tracing::Instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("meshcheck.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, fleet_size: usize, versions: &[String]) {
    info!(
        event = "run.started",
        run_id = %run_id,
        fleet_size = fleet_size,
        versions = %versions.join(","),
    );
}

/// Emit event: the lifecycle entered a new phase.
pub fn emit_phase(run_id: &str, phase: &dyn std::fmt::Display) {
    info!(event = "run.phase", run_id = %run_id, phase = %phase);
}

/// Emit event: one verification sub-case finished.
pub fn emit_subcase(check: &str, subject: &str, passed: bool, cause: Option<&str>) {
    if passed {
        info!(event = "check.subcase", check = %check, subject = %subject, passed = true);
    } else {
        warn!(
            event = "check.subcase",
            check = %check,
            subject = %subject,
            passed = false,
            cause = cause.unwrap_or("unknown"),
        );
    }
}

/// Emit event: a teardown step failed (never escalated).
pub fn emit_cleanup_failed(what: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.cleanup_failed", what = %what, error = %error);
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, passed: bool, failed_subcases: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
        failed_subcases = failed_subcases,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = run_span("test-run-id").entered();
        emit_subcase("reachability", "a -> b", false, Some("no pong"));
        emit_phase("test-run-id", &"setup");
    }
}
