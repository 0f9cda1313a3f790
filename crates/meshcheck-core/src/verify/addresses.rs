//! Address check and the per-check address lookup shared with status and
//! reachability.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use futures::stream::{self, StreamExt};
use ipnet::Ipv4Net;
use tracing::debug;

use super::parse::parse_overlay_address;
use super::{fan_out, CheckKind, SubCaseResult};
use crate::context::RunContext;
use crate::fleet::FleetMember;

/// Hostname to overlay address, as reported by each node just now.
///
/// Nodes whose address could not be obtained are kept with the reason, so
/// dependent sub-cases can fail with a precise cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressAssignment {
    resolved: BTreeMap<String, Ipv4Addr>,
    unresolved: BTreeMap<String, String>,
}

impl AddressAssignment {
    pub fn insert(&mut self, hostname: &str, lookup: Result<Ipv4Addr, String>) {
        match lookup {
            Ok(addr) => {
                self.resolved.insert(hostname.to_string(), addr);
            }
            Err(cause) => {
                self.unresolved.insert(hostname.to_string(), cause);
            }
        }
    }

    pub fn get(&self, hostname: &str) -> Result<Ipv4Addr, String> {
        if let Some(addr) = self.resolved.get(hostname) {
            return Ok(*addr);
        }
        Err(match self.unresolved.get(hostname) {
            Some(cause) => format!("no address for {}: {}", hostname, cause),
            None => format!("no address for {}", hostname),
        })
    }

    pub fn resolved(&self) -> &BTreeMap<String, Ipv4Addr> {
        &self.resolved
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Ask `member` for its own address and validate it against `overlay`.
pub async fn query_address(
    ctx: &RunContext,
    member: &FleetMember,
    overlay: &Ipv4Net,
) -> Result<Ipv4Addr, String> {
    let raw = ctx
        .executor
        .execute_line(&member.env, &ctx.client_commands().own_address())
        .await
        .map_err(|e| e.to_string())?;
    parse_overlay_address(&raw, overlay)
}

/// Query every fleet member's address concurrently.
pub async fn collect_addresses(ctx: &RunContext) -> AddressAssignment {
    let mut assignment = AddressAssignment::default();
    let overlay = match ctx.config.overlay_net() {
        Ok(net) => net,
        Err(e) => {
            for host in ctx.fleet.hostnames() {
                assignment.insert(host, Err(e.to_string()));
            }
            return assignment;
        }
    };

    let overlay = &overlay;
    let lookups: Vec<(String, Result<Ipv4Addr, String>)> = stream::iter(ctx.fleet.members())
        .map(move |member| async move {
            let lookup = query_address(ctx, member, overlay).await;
            (member.hostname.clone(), lookup)
        })
        .buffer_unordered(ctx.config.verification.max_parallel.max(1))
        .collect()
        .await;

    for (host, lookup) in lookups {
        assignment.insert(&host, lookup);
    }
    debug!(
        resolved = assignment.resolved().len(),
        complete = assignment.is_complete(),
        "Collected overlay addresses"
    );
    assignment
}

pub(crate) async fn check(ctx: &RunContext) -> Vec<SubCaseResult> {
    let command = ctx.client_commands().own_address().to_string();
    let overlay = match ctx.config.overlay_net() {
        Ok(net) => net,
        Err(e) => {
            let cause = e.to_string();
            return ctx
                .fleet
                .hostnames()
                .map(|h| {
                    SubCaseResult::fail(CheckKind::Addresses, h, Some(command.clone()), &cause)
                })
                .collect();
        }
    };

    let overlay = &overlay;
    let command = &command;
    fan_out(
        ctx.config.verification.max_parallel,
        ctx.fleet.members().map(move |member| async move {
            let subject = member.hostname.as_str();
            match query_address(ctx, member, overlay).await {
                Ok(_) => SubCaseResult::pass(CheckKind::Addresses, subject, Some(command.clone())),
                Err(cause) => {
                    SubCaseResult::fail(CheckKind::Addresses, subject, Some(command.clone()), cause)
                }
            }
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_lookup() {
        let mut book = AddressAssignment::default();
        book.insert("a", Ok(Ipv4Addr::new(100, 64, 0, 1)));
        book.insert("b", Err("exit 1: not logged in".to_string()));

        assert_eq!(book.get("a"), Ok(Ipv4Addr::new(100, 64, 0, 1)));
        assert!(book.get("b").unwrap_err().contains("not logged in"));
        assert!(book.get("c").is_err());
        assert!(!book.is_complete());
        assert_eq!(book.resolved().len(), 1);
    }
}
