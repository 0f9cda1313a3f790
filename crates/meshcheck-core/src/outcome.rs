//! Run outcome and the persisted run report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, SetupStep};
use crate::verify::{CheckReport, SubCaseResult};

/// Aggregate verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
}

impl RunOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
        })
    }
}

/// Fatal error that ended setup (or the run deadline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupFailure {
    pub step: Option<SetupStep>,
    pub message: String,
}

impl From<&HarnessError> for SetupFailure {
    fn from(err: &HarnessError) -> Self {
        Self {
            step: err.setup_step(),
            message: err.to_string(),
        }
    }
}

/// Everything one run produced, written as JSON when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fleet_size: usize,
    /// Client version to number of nodes running it.
    pub version_mix: BTreeMap<String, usize>,
    pub setup_error: Option<SetupFailure>,
    pub checks: Vec<CheckReport>,
    /// Teardown problems; informational only.
    pub cleanup_errors: Vec<String>,
    /// Files written by log capture.
    pub log_files: Vec<String>,
}

impl RunReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            fleet_size: 0,
            version_mix: BTreeMap::new(),
            setup_error: None,
            checks: Vec::new(),
            cleanup_errors: Vec::new(),
            log_files: Vec::new(),
        }
    }

    /// Failed when setup failed or any sub-case failed. Cleanup errors
    /// never count.
    pub fn outcome(&self) -> RunOutcome {
        if self.setup_error.is_none() && self.checks.iter().all(CheckReport::passed) {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome().is_pass()
    }

    pub fn failed_subcases(&self) -> Vec<&SubCaseResult> {
        self.checks.iter().flat_map(|c| c.failures()).collect()
    }

    pub fn total_subcases(&self) -> usize {
        self.checks.iter().map(|c| c.subcases.len()).sum()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Write the report as pretty JSON, creating parent directories.
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Human readable summary for the terminal.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("run {}: {}\n", report.run_id, report.outcome()));
    out.push_str(&format!("fleet: {} node(s)", report.fleet_size));
    if !report.version_mix.is_empty() {
        let mix: Vec<String> = report
            .version_mix
            .iter()
            .map(|(v, n)| format!("{}x{}", n, v))
            .collect();
        out.push_str(&format!(" ({})", mix.join(", ")));
    }
    out.push('\n');

    if let Some(setup) = &report.setup_error {
        match setup.step {
            Some(step) => out.push_str(&format!("setup failed at {}: {}\n", step, setup.message)),
            None => out.push_str(&format!("setup failed: {}\n", setup.message)),
        }
    }

    if !report.checks.is_empty() {
        out.push_str(&format!(
            "sub-cases: {} of {} failed\n",
            report.failed_subcases().len(),
            report.total_subcases()
        ));
    }
    for check in &report.checks {
        let failed = check.failures().count();
        out.push_str(&format!(
            "- {}: {}/{} passed\n",
            check.check,
            check.subcases.len() - failed,
            check.subcases.len()
        ));
        for sub in check.failures() {
            out.push_str(&format!("    FAIL {}", sub.subject));
            if let Some(cmd) = &sub.command {
                out.push_str(&format!(" [`{}`]", cmd));
            }
            if let Some(cause) = &sub.cause {
                out.push_str(&format!(": {}", cause));
            }
            out.push('\n');
        }
    }

    if !report.log_files.is_empty() {
        out.push_str("logs:\n");
        for file in &report.log_files {
            out.push_str(&format!("    {}\n", file));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::CheckKind;

    fn report_with(subcases: Vec<SubCaseResult>) -> RunReport {
        let mut report = RunReport::new("run-1");
        report.checks.push(CheckReport {
            check: CheckKind::Reachability,
            subcases,
        });
        report
    }

    #[test]
    fn test_outcome_from_subcases() {
        let ok = report_with(vec![SubCaseResult::pass(CheckKind::Reachability, "a -> b", None)]);
        assert_eq!(ok.outcome(), RunOutcome::Passed);

        let bad = report_with(vec![
            SubCaseResult::pass(CheckKind::Reachability, "a -> b", None),
            SubCaseResult::fail(CheckKind::Reachability, "b -> a", None, "no pong"),
        ]);
        assert_eq!(bad.outcome(), RunOutcome::Failed);
        assert_eq!(bad.failed_subcases().len(), 1);
        assert_eq!(bad.total_subcases(), 2);
    }

    #[test]
    fn test_cleanup_errors_do_not_fail() {
        let mut report = report_with(vec![]);
        report.cleanup_errors.push("removing x failed".to_string());
        assert!(report.passed());
    }

    #[test]
    fn test_setup_error_fails() {
        let mut report = RunReport::new("run-1");
        let err = HarnessError::ReadinessTimeout {
            target: "control plane".to_string(),
            attempts: 3,
            elapsed_ms: 60_000,
            last_error: "status 503".to_string(),
        };
        report.setup_error = Some(SetupFailure::from(&err));
        assert!(!report.passed());
        assert_eq!(report.setup_error.as_ref().unwrap().step, Some(SetupStep::WaitReady));
        assert!(render_summary(&report).contains("setup failed at wait-ready"));
    }

    #[test]
    fn test_write_report_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        let report = report_with(vec![SubCaseResult::fail(
            CheckKind::Reachability,
            "a -> b",
            Some("tailscale ping 100.64.0.2".to_string()),
            "no pong",
        )]);

        write_report(&path, &report).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let back: RunReport = serde_json::from_str(&content).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_summary_lists_failures() {
        let report = report_with(vec![SubCaseResult::fail(
            CheckKind::Reachability,
            "a -> b",
            Some("tailscale ping 100.64.0.2".to_string()),
            "no pong",
        )]);
        let text = render_summary(&report);
        assert!(text.contains("sub-cases: 1 of 1 failed"));
        assert!(text.contains("reachability: 0/1 passed"));
        assert!(text.contains("FAIL a -> b [`tailscale ping 100.64.0.2`]: no pong"));
    }
}
