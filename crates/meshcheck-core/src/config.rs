//! Harness configuration.
//!
//! Defaults describe the reference setup: a headscale control plane and a
//! fleet of tailscale clients on a private docker network. Values come from
//! [`HarnessConfig::default`], then an optional TOML file, then `MESHCHECK_*`
//! environment variables, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::verify::CheckKind;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Name of the isolated network the whole run lives on.
    pub network: String,
    /// Block every assigned overlay address must fall in.
    pub overlay_prefix: String,
    /// Hard limit for setup + verification. Teardown always runs.
    pub run_deadline_secs: Option<u64>,
    pub backend: BackendConfig,
    pub control_plane: ControlPlaneConfig,
    pub clients: ClientConfig,
    pub readiness: ReadinessConfig,
    pub convergence: ConvergenceConfig,
    pub probe: ProbeConfig,
    pub verification: VerificationConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network: "headscale-test".to_string(),
            overlay_prefix: "100.64.0.0/10".to_string(),
            run_deadline_secs: None,
            backend: BackendConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            clients: ClientConfig::default(),
            readiness: ReadinessConfig::default(),
            convergence: ConvergenceConfig::default(),
            probe: ProbeConfig::default(),
            verification: VerificationConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// Container backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Docker-compatible CLI binary.
    pub container_cli: String,
    /// Bound for image builds, container starts and network calls.
    pub op_timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            container_cli: "docker".to_string(),
            op_timeout_secs: None,
        }
    }
}

/// Control-plane environment and CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Container name, also its hostname on the run network.
    pub name: String,
    pub dockerfile: PathBuf,
    pub context_dir: PathBuf,
    pub image: String,
    /// `host:container` bind mounts; relative host paths resolve against
    /// the working directory.
    pub mounts: Vec<String>,
    pub container_port: String,
    /// Fixed host port; `None` lets the backend choose.
    pub host_port: Option<String>,
    pub command: Vec<String>,
    /// Control-plane CLI binary inside the container.
    pub cli: String,
    pub namespace: String,
    pub credential_expiry: String,
    pub health_path: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            name: "headscale".to_string(),
            dockerfile: PathBuf::from("Dockerfile"),
            context_dir: PathBuf::from("."),
            image: "meshcheck-headscale:latest".to_string(),
            mounts: vec![
                "integration_test/etc:/etc/headscale".to_string(),
                "derp.yaml:/etc/headscale/derp.yaml".to_string(),
            ],
            container_port: "8080/tcp".to_string(),
            host_port: Some("8080".to_string()),
            command: vec!["headscale".to_string(), "serve".to_string()],
            cli: "headscale".to_string(),
            namespace: "test".to_string(),
            credential_expiry: "24h".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

impl ControlPlaneConfig {
    /// Port number part of `container_port` (`8080/tcp` -> `8080`).
    pub fn container_port_number(&self) -> &str {
        self.container_port
            .split_once('/')
            .map(|(port, _)| port)
            .unwrap_or(&self.container_port)
    }
}

/// Client fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Fleet size.
    pub count: usize,
    /// Client versions, assigned round-robin by slot.
    pub versions: Vec<String>,
    pub dockerfile: PathBuf,
    pub context_dir: PathBuf,
    /// Images are tagged `<image_prefix>:<version>`.
    pub image_prefix: String,
    /// Build argument carrying the version.
    pub version_build_arg: String,
    pub hostname_prefix: String,
    pub command: Vec<String>,
    /// Client CLI binary inside the container.
    pub cli: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            count: 25,
            versions: vec!["1.14.3".to_string(), "1.12.3".to_string()],
            dockerfile: PathBuf::from("Dockerfile.tailscale"),
            context_dir: PathBuf::from("."),
            image_prefix: "meshcheck-tailscale".to_string(),
            version_build_arg: "TAILSCALE_VERSION".to_string(),
            hostname_prefix: "tailscale".to_string(),
            command: vec![
                "tailscaled".to_string(),
                "--tun=userspace-networking".to_string(),
                "--socks5-server=localhost:1055".to_string(),
            ],
            cli: "tailscale".to_string(),
        }
    }
}

/// Control-plane health gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub deadline_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 60,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            request_timeout_ms: 2_000,
        }
    }
}

/// How bootstrap waits for membership to propagate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStrategy {
    /// Poll every node's status until each lists the whole fleet.
    Poll,
    /// Sleep for `settle_secs`.
    Sleep,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub strategy: ConvergenceStrategy,
    pub settle_secs: u64,
    pub poll_deadline_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            strategy: ConvergenceStrategy::Poll,
            settle_secs: 60,
            poll_deadline_secs: 120,
            poll_interval_ms: 2_000,
        }
    }
}

/// Reachability probe parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub require_direct: bool,
    /// Text a successful probe prints.
    pub success_marker: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1,
            attempts: 20,
            require_direct: true,
            success_marker: "pong".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub checks: Vec<CheckKind>,
    /// Sub-cases in flight at once.
    pub max_parallel: usize,
    /// Per remote command; unset means commands may block indefinitely.
    pub command_timeout_secs: Option<u64>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            checks: CheckKind::ALL.to_vec(),
            max_parallel: 16,
            command_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Where logs of a failed run are written.
    pub log_dir: PathBuf,
    /// Also keep client logs on failure, not only the control plane's.
    pub capture_client_logs: bool,
    /// Write a JSON run report here.
    pub report_path: Option<PathBuf>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("test_output"),
            capture_client_logs: false,
            report_path: None,
        }
    }
}

impl HarnessConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Apply `MESHCHECK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `MESHCHECK_*` overrides from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(count) = lookup("MESHCHECK_NODE_COUNT") {
            self.clients.count = count.trim().parse().map_err(|_| {
                HarnessError::Config(format!("MESHCHECK_NODE_COUNT={:?} is not a number", count))
            })?;
        }
        if let Some(versions) = lookup("MESHCHECK_CLIENT_VERSIONS") {
            self.clients.versions = split_list(&versions);
        }
        if let Some(cli) = lookup("MESHCHECK_CONTAINER_CLI") {
            self.backend.container_cli = cli;
        }
        if let Some(dir) = lookup("MESHCHECK_LOG_DIR") {
            self.diagnostics.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.clients.count == 0 {
            return Err(HarnessError::Config("clients.count must be at least 1".into()));
        }
        let versions = &self.clients.versions;
        if versions.is_empty() || versions.iter().any(|v| v.trim().is_empty()) {
            return Err(HarnessError::Config(
                "clients.versions must list at least one version".into(),
            ));
        }
        if self.probe.attempts == 0 {
            return Err(HarnessError::Config("probe.attempts must be at least 1".into()));
        }
        if self.verification.max_parallel == 0 {
            return Err(HarnessError::Config("verification.max_parallel must be at least 1".into()));
        }
        if self.network.trim().is_empty() {
            return Err(HarnessError::Config("network must not be empty".into()));
        }
        self.overlay_net()?;
        Ok(())
    }

    /// Parsed overlay block.
    pub fn overlay_net(&self) -> Result<Ipv4Net> {
        self.overlay_prefix.parse().map_err(|e| {
            HarnessError::Config(format!("overlay_prefix {:?}: {}", self.overlay_prefix, e))
        })
    }

    pub fn readiness_deadline(&self) -> Duration {
        Duration::from_secs(self.readiness.deadline_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.verification.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_setup() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.network, "headscale-test");
        assert_eq!(cfg.clients.count, 25);
        assert_eq!(cfg.clients.versions, vec!["1.14.3", "1.12.3"]);
        assert_eq!(cfg.control_plane.container_port_number(), "8080");
        assert_eq!(cfg.probe.attempts, 20);
        assert_eq!(cfg.probe.success_marker, "pong");
        assert_eq!(cfg.verification.checks.len(), 4);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = HarnessConfig::from_toml_str(
            r#"
            overlay_prefix = "100.64.0.0/10"

            [clients]
            count = 2
            versions = ["1.14.3"]

            [convergence]
            strategy = "sleep"
            settle_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.clients.count, 2);
        assert_eq!(cfg.clients.versions, vec!["1.14.3"]);
        assert_eq!(cfg.clients.cli, "tailscale");
        assert_eq!(cfg.convergence.strategy, ConvergenceStrategy::Sleep);
        assert_eq!(cfg.convergence.settle_secs, 5);
        assert_eq!(cfg.control_plane.name, "headscale");
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let cfg = HarnessConfig::default();
        let rendered = cfg.to_toml().unwrap();
        let back = HarnessConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MESHCHECK_NODE_COUNT", "4"),
            ("MESHCHECK_CLIENT_VERSIONS", "1.16.0, 1.14.3,"),
            ("MESHCHECK_CONTAINER_CLI", "podman"),
            ("MESHCHECK_LOG_DIR", "/tmp/meshcheck-logs"),
        ]
        .into_iter()
        .collect();

        let mut cfg = HarnessConfig::default();
        cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.clients.count, 4);
        assert_eq!(cfg.clients.versions, vec!["1.16.0", "1.14.3"]);
        assert_eq!(cfg.backend.container_cli, "podman");
        assert_eq!(cfg.diagnostics.log_dir, PathBuf::from("/tmp/meshcheck-logs"));
    }

    #[test]
    fn test_env_bad_count_rejected() {
        let mut cfg = HarnessConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == "MESHCHECK_NODE_COUNT").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = HarnessConfig::default();
        cfg.clients.versions.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = HarnessConfig::default();
        cfg.overlay_prefix = "not-a-prefix".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = HarnessConfig::default();
        cfg.probe.attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = HarnessConfig::default();
        cfg.clients.count = 0;
        assert!(cfg.validate().is_err());
    }
}
