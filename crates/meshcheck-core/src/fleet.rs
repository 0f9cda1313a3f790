//! Fleet model: the client environments of one run, keyed by hostname.

use std::collections::BTreeMap;
use std::fmt;

use meshcheck_provision::Environment;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// One planned client slot, before its environment exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSlot {
    pub slot: usize,
    pub version: String,
    pub hostname: String,
}

/// Version for `slot`: round-robin over `versions` in order.
pub fn version_for_slot(versions: &[String], slot: usize) -> Option<&str> {
    if versions.is_empty() {
        return None;
    }
    Some(versions[slot % versions.len()].as_str())
}

/// `<prefix>-<version with dots replaced by dashes>-<slot>`
pub fn client_hostname(prefix: &str, version: &str, slot: usize) -> String {
    format!("{}-{}-{}", prefix, version.replace('.', "-"), slot)
}

/// Lay out `count` client slots.
pub fn plan_slots(prefix: &str, versions: &[String], count: usize) -> Vec<ClientSlot> {
    (0..count)
        .filter_map(|slot| {
            let version = version_for_slot(versions, slot)?;
            Some(ClientSlot {
                slot,
                version: version.to_string(),
                hostname: client_hostname(prefix, version, slot),
            })
        })
        .collect()
}

/// A provisioned client.
#[derive(Debug, Clone)]
pub struct FleetMember {
    pub hostname: String,
    pub version: String,
    pub slot: usize,
    pub env: Environment,
}

/// Client environments of one run.
///
/// Written by bootstrap only; verification reads it through `&Fleet`.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    members: BTreeMap<String, FleetMember>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Hostnames are unique within a fleet.
    pub fn insert(&mut self, member: FleetMember) -> Result<()> {
        if self.members.contains_key(&member.hostname) {
            return Err(HarnessError::Config(format!(
                "duplicate fleet hostname {}",
                member.hostname
            )));
        }
        self.members.insert(member.hostname.clone(), member);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, hostname: &str) -> Option<&FleetMember> {
        self.members.get(hostname)
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn members(&self) -> impl Iterator<Item = &FleetMember> {
        self.members.values()
    }

    /// Take all members out, leaving the fleet empty.
    pub fn drain(&mut self) -> Vec<FleetMember> {
        std::mem::take(&mut self.members).into_values().collect()
    }

    /// Count of members per client version.
    pub fn version_mix(&self) -> BTreeMap<&str, usize> {
        let mut mix = BTreeMap::new();
        for member in self.members.values() {
            *mix.entry(member.version.as_str()).or_insert(0) += 1;
        }
        mix
    }
}

/// Reusable join token issued by the control plane.
///
/// Redacted in `Debug` and `Display` so it never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct EnrollmentCredential(String);

impl EnrollmentCredential {
    /// Wrap raw CLI output, dropping the trailing newline.
    pub fn new(raw: &str) -> Option<Self> {
        let token = raw.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return None;
        }
        Some(Self(token.to_string()))
    }

    /// The secret itself, for building the join command.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EnrollmentCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnrollmentCredential(****)")
    }
}

impl fmt::Display for EnrollmentCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn versions() -> Vec<String> {
        vec!["1.14.3".to_string(), "1.12.3".to_string()]
    }

    fn env(name: &str) -> Environment {
        Environment {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: "img".to_string(),
            network: None,
            ports: Default::default(),
            mounts: vec![],
            command: vec![],
        }
    }

    #[test]
    fn test_round_robin_versions() {
        let v = versions();
        assert_eq!(version_for_slot(&v, 0), Some("1.14.3"));
        assert_eq!(version_for_slot(&v, 1), Some("1.12.3"));
        assert_eq!(version_for_slot(&v, 2), Some("1.14.3"));
        assert_eq!(version_for_slot(&v, 25), Some("1.12.3"));
        assert_eq!(version_for_slot(&[], 0), None);
    }

    #[test]
    fn test_hostname_format() {
        assert_eq!(client_hostname("tailscale", "1.14.3", 7), "tailscale-1-14-3-7");
    }

    #[test]
    fn test_plan_slots_unique_for_many_sizes() {
        for n in 2..40 {
            let slots = plan_slots("tailscale", &versions(), n);
            assert_eq!(slots.len(), n);
            let unique: HashSet<_> = slots.iter().map(|s| s.hostname.as_str()).collect();
            assert_eq!(unique.len(), n);
        }
    }

    #[test]
    fn test_plan_slots_same_version_distinct_hosts() {
        let slots = plan_slots("tailscale", &["1.14.3".to_string()], 2);
        assert_eq!(slots[0].hostname, "tailscale-1-14-3-0");
        assert_eq!(slots[1].hostname, "tailscale-1-14-3-1");
    }

    #[test]
    fn test_fleet_rejects_duplicates() {
        let mut fleet = Fleet::new();
        let member = FleetMember {
            hostname: "a".to_string(),
            version: "1".to_string(),
            slot: 0,
            env: env("a"),
        };
        fleet.insert(member.clone()).unwrap();
        assert!(fleet.insert(member).is_err());
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn test_version_mix() {
        let mut fleet = Fleet::new();
        for slot in plan_slots("t", &versions(), 5) {
            fleet
                .insert(FleetMember {
                    env: env(&slot.hostname),
                    hostname: slot.hostname,
                    version: slot.version,
                    slot: slot.slot,
                })
                .unwrap();
        }
        let mix = fleet.version_mix();
        assert_eq!(mix.get("1.14.3"), Some(&3));
        assert_eq!(mix.get("1.12.3"), Some(&2));
    }

    #[test]
    fn test_credential_redacted() {
        let cred = EnrollmentCredential::new("abcdef0123456789\n").unwrap();
        assert_eq!(cred.expose(), "abcdef0123456789");
        assert!(!format!("{:?}", cred).contains("abcdef"));
        assert!(!cred.to_string().contains("abcdef"));
        assert!(EnrollmentCredential::new("  \n").is_none());
        assert!(EnrollmentCredential::new("two words").is_none());
    }
}
