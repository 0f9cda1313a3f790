//! Connectivity verification engine.
//!
//! Four independent checks run against a converged fleet. Each check is a
//! set of sub-cases (one per node or per ordered node pair) executed
//! concurrently; a failing sub-case never stops its siblings.
//!
//! - **membership**: the control plane lists every fleet member
//! - **addresses**: every node holds a valid address in the overlay block
//! - **status**: every node's peer listing covers the whole fleet
//! - **reachability**: every node pings every other node directly

pub mod addresses;
pub mod membership;
pub mod parse;
pub mod reachability;
pub mod status;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RunContext;
use crate::metrics::METRICS;
use crate::obs;

pub use addresses::{collect_addresses, AddressAssignment};

/// One of the four verification checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Membership,
    Addresses,
    Status,
    Reachability,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::Membership,
        CheckKind::Addresses,
        CheckKind::Status,
        CheckKind::Reachability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Membership => "membership",
            CheckKind::Addresses => "addresses",
            CheckKind::Status => "status",
            CheckKind::Reachability => "reachability",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = CheckKind::ALL.iter().map(CheckKind::as_str).collect();
                format!("unknown check {:?} (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Outcome of one independently attributable unit of verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCaseResult {
    pub check: CheckKind,
    /// Hostname, or `source -> destination` for pairs.
    pub subject: String,
    /// Command issued, with secrets masked.
    pub command: Option<String>,
    pub passed: bool,
    pub cause: Option<String>,
}

impl SubCaseResult {
    pub fn pass(check: CheckKind, subject: impl Into<String>, command: Option<String>) -> Self {
        Self {
            check,
            subject: subject.into(),
            command,
            passed: true,
            cause: None,
        }
    }

    pub fn fail(
        check: CheckKind,
        subject: impl Into<String>,
        command: Option<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            check,
            subject: subject.into(),
            command,
            passed: false,
            cause: Some(cause.into()),
        }
    }
}

/// All sub-cases of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub check: CheckKind,
    pub subcases: Vec<SubCaseResult>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.subcases.iter().all(|s| s.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubCaseResult> {
        self.subcases.iter().filter(|s| !s.passed)
    }
}

/// Run one check against the fleet in `ctx`.
pub async fn run_check(ctx: &RunContext, kind: CheckKind) -> CheckReport {
    let subcases = match kind {
        CheckKind::Membership => membership::check(ctx).await,
        CheckKind::Addresses => addresses::check(ctx).await,
        CheckKind::Status => status::check(ctx).await,
        CheckKind::Reachability => reachability::check(ctx).await,
    };

    for sub in &subcases {
        METRICS.record_subcase(sub.passed);
        obs::emit_subcase(kind.as_str(), &sub.subject, sub.passed, sub.cause.as_deref());
    }

    let report = CheckReport { check: kind, subcases };
    info!(
        check = %kind,
        subcases = report.subcases.len(),
        failed = report.failures().count(),
        "Check finished"
    );
    report
}

/// Run every check selected in the configuration, in declaration order.
pub async fn run_suite(ctx: &RunContext) -> Vec<CheckReport> {
    let mut reports = Vec::with_capacity(ctx.config.verification.checks.len());
    for kind in ctx.config.verification.checks.iter().copied() {
        reports.push(run_check(ctx, kind).await);
    }
    reports
}

/// Drive sub-case futures with at most `max_parallel` in flight and return
/// their results ordered by subject.
pub(crate) async fn fan_out<I>(max_parallel: usize, cases: I) -> Vec<SubCaseResult>
where
    I: IntoIterator,
    I::Item: Future<Output = SubCaseResult>,
{
    let mut results: Vec<SubCaseResult> = stream::iter(cases)
        .buffer_unordered(max_parallel.max(1))
        .collect()
        .await;
    results.sort_by(|a, b| a.subject.cmp(&b.subject));
    results
}
