//! Parsing of control-plane and client CLI output.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

/// Non-blank lines of a listing.
pub fn listing_lines(output: &str) -> Vec<&str> {
    output.lines().filter(|l| !l.trim().is_empty()).collect()
}

/// Entries in a tabular listing whose first non-blank line is a header.
pub fn table_entries(output: &str) -> usize {
    listing_lines(output).len().saturating_sub(1)
}

/// Whether `line` has `token` as a whole whitespace separated field.
///
/// Plain substring matching would let `node-1` match `node-10`.
pub fn has_token(line: &str, token: &str) -> bool {
    line.split_whitespace().any(|field| field == token)
}

/// Lines of `lines` carrying `token` as a field.
pub fn lines_with_token(lines: &[&str], token: &str) -> usize {
    lines.iter().filter(|l| has_token(l, token)).count()
}

/// Parse a node's own address and require it inside `overlay`.
pub fn parse_overlay_address(raw: &str, overlay: &Ipv4Net) -> Result<Ipv4Addr, String> {
    let trimmed = raw.trim();
    let addr: IpAddr = trimmed
        .parse()
        .map_err(|_| format!("{:?} is not an IP address", trimmed))?;
    let v4 = match addr {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return Err(format!("{} is not an IPv4 address", addr)),
    };
    if !overlay.contains(&v4) {
        return Err(format!("{} is outside {}", v4, overlay));
    }
    Ok(v4)
}

/// Ordered pairs `(source, destination)` with `source != destination`.
pub fn ordered_pairs<'a>(hosts: &[&'a str]) -> Vec<(&'a str, &'a str)> {
    let mut pairs = Vec::with_capacity(hosts.len() * hosts.len().saturating_sub(1));
    for &src in hosts {
        for &dst in hosts {
            if src != dst {
                pairs.push((src, dst));
            }
        }
    }
    pairs
}
