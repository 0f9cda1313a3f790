//! Status check: every node's peer listing covers the whole fleet.

use super::addresses::{collect_addresses, AddressAssignment};
use super::parse::{listing_lines, lines_with_token};
use super::{fan_out, CheckKind, SubCaseResult};
use crate::context::RunContext;
use crate::fleet::{Fleet, FleetMember};

/// Problems with one node's status listing, empty when it is consistent.
///
/// The listing holds one line per fleet member (the node itself included)
/// and names every other member's hostname and address exactly once.
pub fn status_problems(
    own: &str,
    listing: &str,
    fleet: &Fleet,
    addresses: Option<&AddressAssignment>,
) -> Vec<String> {
    let lines = listing_lines(listing);
    let mut problems = Vec::new();

    if lines.len() != fleet.len() {
        problems.push(format!("{} status line(s), fleet has {}", lines.len(), fleet.len()));
    }

    for peer in fleet.hostnames().filter(|h| *h != own) {
        match lines_with_token(&lines, peer) {
            1 => {}
            0 => problems.push(format!("peer {} missing", peer)),
            n => problems.push(format!("peer {} listed {} times", peer, n)),
        }

        let Some(addresses) = addresses else { continue };
        match addresses.get(peer) {
            Ok(addr) => match lines_with_token(&lines, &addr.to_string()) {
                1 => {}
                0 => problems.push(format!("address {} of {} missing", addr, peer)),
                n => problems.push(format!("address {} of {} listed {} times", addr, peer, n)),
            },
            Err(cause) => problems.push(cause),
        }
    }
    problems
}

/// Whether `member`'s own view already lists the whole fleet.
///
/// Hostnames only; used while waiting for convergence, before addresses are
/// worth checking.
pub async fn view_complete(ctx: &RunContext, member: &FleetMember) -> Result<(), String> {
    let listing = ctx
        .executor
        .execute(&member.env, &ctx.client_commands().peer_status())
        .await
        .map_err(|e| e.to_string())?;
    let problems = status_problems(&member.hostname, &listing, &ctx.fleet, None);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!("{}: {}", member.hostname, problems.join("; ")))
    }
}

pub(crate) async fn check(ctx: &RunContext) -> Vec<SubCaseResult> {
    let addresses = collect_addresses(ctx).await;
    let command = ctx.client_commands().peer_status().to_string();

    let addresses = &addresses;
    let command = &command;
    fan_out(
        ctx.config.verification.max_parallel,
        ctx.fleet.members().map(move |member| async move {
            let subject = member.hostname.as_str();
            let listing = match ctx
                .executor
                .execute(&member.env, &ctx.client_commands().peer_status())
                .await
            {
                Ok(listing) => listing,
                Err(e) => {
                    let command = Some(command.clone());
                    return SubCaseResult::fail(CheckKind::Status, subject, command, e.to_string());
                }
            };

            let problems = status_problems(subject, &listing, &ctx.fleet, Some(addresses));
            if problems.is_empty() {
                SubCaseResult::pass(CheckKind::Status, subject, Some(command.clone()))
            } else {
                let cause = problems.join("; ");
                SubCaseResult::fail(CheckKind::Status, subject, Some(command.clone()), cause)
            }
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcheck_provision::Environment;
    use std::net::Ipv4Addr;

    fn fleet(hosts: &[&str]) -> Fleet {
        let mut fleet = Fleet::new();
        for (slot, host) in hosts.iter().enumerate() {
            fleet
                .insert(FleetMember {
                    hostname: host.to_string(),
                    version: "1.14.3".to_string(),
                    slot,
                    env: Environment {
                        id: format!("id-{}", host),
                        name: host.to_string(),
                        image: "img".to_string(),
                        network: None,
                        ports: Default::default(),
                        mounts: vec![],
                        command: vec![],
                    },
                })
                .unwrap();
        }
        fleet
    }

    fn book() -> AddressAssignment {
        let mut book = AddressAssignment::default();
        book.insert("n-1", Ok(Ipv4Addr::new(100, 64, 0, 1)));
        book.insert("n-2", Ok(Ipv4Addr::new(100, 64, 0, 2)));
        book.insert("n-10", Ok(Ipv4Addr::new(100, 64, 0, 10)));
        book
    }

    const FULL: &str = "100.64.0.1   n-1   test linux -\n\
                        100.64.0.2   n-2   test linux -\n\
                        100.64.0.10  n-10  test linux -\n";

    #[test]
    fn test_consistent_listing() {
        let fleet = fleet(&["n-1", "n-2", "n-10"]);
        assert!(status_problems("n-1", FULL, &fleet, Some(&book())).is_empty());
    }

    #[test]
    fn test_missing_peer_not_masked_by_prefix() {
        let fleet = fleet(&["n-1", "n-2", "n-10"]);
        let listing = "100.64.0.1   n-1   test linux -\n\
                       100.64.0.10  n-10  test linux -\n";
        let problems = status_problems("n-10", listing, &fleet, Some(&book()));
        assert!(problems.iter().any(|p| p.contains("2 status line(s)")));
        assert!(problems.iter().any(|p| p == "peer n-2 missing"));
        assert!(problems.iter().any(|p| p.contains("address 100.64.0.2 of n-2 missing")));
    }

    #[test]
    fn test_wrong_address_reported() {
        let fleet = fleet(&["n-1", "n-2", "n-10"]);
        let listing = FULL.replace("100.64.0.2 ", "100.64.0.9 ");
        let problems = status_problems("n-1", &listing, &fleet, Some(&book()));
        assert_eq!(problems, vec!["address 100.64.0.2 of n-2 missing".to_string()]);
    }

    #[test]
    fn test_hostnames_only_view() {
        let fleet = fleet(&["n-1", "n-2"]);
        let listing = "100.64.0.1 n-1 test linux -\n100.64.0.2 n-2 test linux -\n";
        assert!(status_problems("n-1", listing, &fleet, None).is_empty());
    }
}
