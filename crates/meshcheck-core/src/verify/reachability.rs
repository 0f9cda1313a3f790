//! All-pairs reachability: every node pings every other node directly.

use std::net::IpAddr;

use super::addresses::collect_addresses;
use super::parse::ordered_pairs;
use super::{fan_out, CheckKind, SubCaseResult};
use crate::context::RunContext;

/// Sub-case subject for the ordered pair.
pub fn pair_subject(source: &str, destination: &str) -> String {
    format!("{} -> {}", source, destination)
}

pub(crate) async fn check(ctx: &RunContext) -> Vec<SubCaseResult> {
    let addresses = collect_addresses(ctx).await;
    let hosts: Vec<&str> = ctx.fleet.hostnames().collect();
    let pairs = ordered_pairs(&hosts);
    let probe = &ctx.config.probe;
    let addresses = &addresses;

    fan_out(
        ctx.config.verification.max_parallel,
        pairs.into_iter().map(move |(src, dst)| async move {
            let subject = pair_subject(src, dst);
            let Some(source) = ctx.fleet.get(src) else {
                let cause = format!("{} not in fleet", src);
                return SubCaseResult::fail(CheckKind::Reachability, subject, None, cause);
            };
            let addr = match addresses.get(dst) {
                Ok(addr) => addr,
                Err(cause) => {
                    return SubCaseResult::fail(CheckKind::Reachability, subject, None, cause)
                }
            };

            let cmd = ctx.client_commands().ping(IpAddr::V4(addr), probe);
            let command = Some(cmd.to_string());
            match ctx.executor.execute(&source.env, &cmd).await {
                Ok(out) if out.contains(probe.success_marker.as_str()) => {
                    SubCaseResult::pass(CheckKind::Reachability, subject, command)
                }
                Ok(out) => SubCaseResult::fail(
                    CheckKind::Reachability,
                    subject,
                    command,
                    format!("no {:?} in probe output: {}", probe.success_marker, out.trim()),
                ),
                Err(e) => {
                    SubCaseResult::fail(CheckKind::Reachability, subject, command, e.to_string())
                }
            }
        }),
    )
    .await
}
