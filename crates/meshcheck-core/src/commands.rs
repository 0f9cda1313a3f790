//! Command lines for the control-plane and client CLIs.
//!
//! The harness never links against either binary; it only knows the argv
//! shapes below and runs them inside the matching environment.

use std::fmt;
use std::net::IpAddr;

use crate::config::{ControlPlaneConfig, ProbeConfig};
use crate::fleet::EnrollmentCredential;

/// An argv to run remotely, with an optional secret masked when displayed.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    argv: Vec<String>,
    secret: Option<String>,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            secret: None,
        }
    }

    fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<&str> = self
            .argv
            .iter()
            .map(|arg| match &self.secret {
                Some(secret) if arg == secret => "****",
                _ => arg.as_str(),
            })
            .collect();
        f.write_str(&rendered.join(" "))
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteCommand({})", self)
    }
}

/// Control-plane CLI.
#[derive(Debug, Clone)]
pub struct ControlPlaneCommands {
    cli: String,
    namespace: String,
    expiry: String,
}

impl ControlPlaneCommands {
    pub fn new(config: &ControlPlaneConfig) -> Self {
        Self {
            cli: config.cli.clone(),
            namespace: config.namespace.clone(),
            expiry: config.credential_expiry.clone(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn create_namespace(&self) -> RemoteCommand {
        RemoteCommand::new([self.cli.as_str(), "namespaces", "create", self.namespace.as_str()])
    }

    /// Reusable, time-bounded enrollment credential for the namespace.
    pub fn create_credential(&self) -> RemoteCommand {
        RemoteCommand::new([
            self.cli.as_str(),
            "-n",
            self.namespace.as_str(),
            "preauthkeys",
            "create",
            "--reusable",
            "--expiration",
            self.expiry.as_str(),
        ])
    }

    pub fn list_nodes(&self) -> RemoteCommand {
        RemoteCommand::new([self.cli.as_str(), "-n", self.namespace.as_str(), "nodes", "list"])
    }
}

/// Client CLI.
#[derive(Debug, Clone)]
pub struct ClientCommands {
    cli: String,
}

impl ClientCommands {
    pub fn new(cli: &str) -> Self {
        Self { cli: cli.to_string() }
    }

    pub fn join(
        &self,
        login_server: &str,
        credential: &EnrollmentCredential,
        hostname: &str,
    ) -> RemoteCommand {
        RemoteCommand::new([
            self.cli.as_str(),
            "up",
            "-login-server",
            login_server,
            "--authkey",
            credential.expose(),
            "--hostname",
            hostname,
        ])
        .with_secret(credential.expose())
    }

    pub fn own_address(&self) -> RemoteCommand {
        RemoteCommand::new([self.cli.as_str(), "ip"])
    }

    pub fn peer_status(&self) -> RemoteCommand {
        RemoteCommand::new([self.cli.as_str(), "status"])
    }

    pub fn ping(&self, destination: IpAddr, probe: &ProbeConfig) -> RemoteCommand {
        RemoteCommand::new(vec![
            self.cli.clone(),
            "ping".to_string(),
            format!("--timeout={}s", probe.timeout_secs),
            format!("--c={}", probe.attempts),
            format!("--until-direct={}", probe.require_direct),
            destination.to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_plane_commands() {
        let cmds = ControlPlaneCommands::new(&ControlPlaneConfig::default());
        assert_eq!(cmds.create_namespace().to_string(), "headscale namespaces create test");
        assert_eq!(
            cmds.create_credential().to_string(),
            "headscale -n test preauthkeys create --reusable --expiration 24h"
        );
        assert_eq!(cmds.list_nodes().to_string(), "headscale -n test nodes list");
    }

    #[test]
    fn test_join_masks_credential() {
        let cred = EnrollmentCredential::new("s3cr3tkey").unwrap();
        let cmd = ClientCommands::new("tailscale").join(
            "http://headscale:8080",
            &cred,
            "tailscale-1-14-3-0",
        );

        assert!(cmd.argv().contains(&"s3cr3tkey".to_string()));
        let shown = cmd.to_string();
        assert!(!shown.contains("s3cr3tkey"));
        assert_eq!(
            shown,
            "tailscale up -login-server http://headscale:8080 --authkey **** --hostname tailscale-1-14-3-0"
        );
    }

    #[test]
    fn test_ping_command() {
        let cmd = ClientCommands::new("tailscale")
            .ping("100.64.0.2".parse().unwrap(), &ProbeConfig::default());
        assert_eq!(
            cmd.to_string(),
            "tailscale ping --timeout=1s --c=20 --until-direct=true 100.64.0.2"
        );
    }
}
