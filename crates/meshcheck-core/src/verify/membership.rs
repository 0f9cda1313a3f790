//! Membership check: the control plane lists exactly the fleet.

use super::parse::table_entries;
use super::{CheckKind, SubCaseResult};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};

/// Number of nodes the control plane lists for the namespace, plus the raw
/// listing.
pub async fn listed_members(ctx: &RunContext) -> Result<(usize, String)> {
    let control_plane = ctx.control_plane.as_ref().ok_or_else(|| HarnessError::Parse {
        subject: "membership".to_string(),
        input: String::new(),
        reason: "control plane is not running".to_string(),
    })?;
    let listing = ctx
        .executor
        .execute(&control_plane.env, &ctx.control_plane_commands().list_nodes())
        .await?;
    Ok((table_entries(&listing), listing))
}

pub(crate) async fn check(ctx: &RunContext) -> Vec<SubCaseResult> {
    let command = ctx.control_plane_commands().list_nodes().to_string();
    let subject = ctx.config.control_plane.name.clone();

    let (count, listing) = match listed_members(ctx).await {
        Ok(found) => found,
        Err(e) => {
            let cause = e.to_string();
            return vec![SubCaseResult::fail(CheckKind::Membership, subject, Some(command), cause)];
        }
    };

    let mut problems = Vec::new();
    if count != ctx.fleet.len() {
        problems.push(format!("listed {} node(s), fleet has {}", count, ctx.fleet.len()));
    }
    let missing: Vec<&str> = ctx.fleet.hostnames().filter(|h| !listing.contains(h)).collect();
    if !missing.is_empty() {
        problems.push(format!("missing from listing: {}", missing.join(", ")));
    }

    let result = if problems.is_empty() {
        SubCaseResult::pass(CheckKind::Membership, subject, Some(command))
    } else {
        SubCaseResult::fail(CheckKind::Membership, subject, Some(command), problems.join("; "))
    };
    vec![result]
}
