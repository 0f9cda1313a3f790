//! Build and run specifications plus the handles the backend hands back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How to build an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Dockerfile path, relative to `context_dir` unless absolute.
    pub dockerfile: PathBuf,
    /// Build context directory.
    pub context_dir: PathBuf,
    /// Tag given to the built image; the container runs from it.
    pub tag: String,
    /// `--build-arg` values.
    pub build_args: BTreeMap<String, String>,
}

impl BuildSpec {
    pub fn new(dockerfile: impl Into<PathBuf>, context_dir: impl Into<PathBuf>, tag: &str) -> Self {
        Self {
            dockerfile: dockerfile.into(),
            context_dir: context_dir.into(),
            tag: tag.to_string(),
            build_args: BTreeMap::new(),
        }
    }

    /// Add a build argument (builder pattern).
    pub fn with_build_arg(mut self, name: &str, value: &str) -> Self {
        self.build_args.insert(name.to_string(), value.to_string());
        self
    }
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

impl Mount {
    /// Parse `host:container`. Relative host paths are resolved against `base`.
    pub fn parse(raw: &str, base: &Path) -> Option<Self> {
        let (host, container) = raw.split_once(':')?;
        if host.is_empty() || container.is_empty() {
            return None;
        }
        let host = PathBuf::from(host);
        let host = if host.is_absolute() {
            host
        } else {
            base.join(host)
        };
        Some(Self {
            host,
            container: container.to_string(),
        })
    }

    /// Render as a `-v` argument.
    pub fn as_volume_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// A container port published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Container side, e.g. `8080/tcp`.
    pub container_port: String,
    /// Host port; `None` lets the backend pick an ephemeral one.
    pub host_port: Option<String>,
}

impl PortBinding {
    pub fn new(container_port: &str, host_port: Option<&str>) -> Self {
        Self {
            container_port: container_port.to_string(),
            host_port: host_port.map(str::to_string),
        }
    }

    /// Render as a `-p` argument.
    pub fn as_publish_arg(&self) -> String {
        match &self.host_port {
            Some(host) => format!("{}:{}", host, self.container_port),
            None => self.container_port.clone(),
        }
    }
}

/// How to run a container from a freshly built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunSpec {
    /// Container name; also its DNS name on the attached network.
    pub name: String,
    /// Network to attach to.
    pub network: Option<String>,
    pub mounts: Vec<Mount>,
    pub port_bindings: Vec<PortBinding>,
    pub env: BTreeMap<String, String>,
    /// Launch command; empty keeps the image default.
    pub command: Vec<String>,
}

/// Restart behaviour of a container.
///
/// Harness containers never restart and are removed by the backend as soon
/// as they stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub auto_restart: bool,
    pub auto_remove: bool,
}

impl RestartPolicy {
    pub const fn ephemeral() -> Self {
        Self {
            auto_restart: false,
            auto_remove: true,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::ephemeral()
    }
}

/// A running container, as created by a [`crate::Provisioner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Backend identifier (container id).
    pub id: String,
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    /// Container port -> host port.
    pub ports: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub command: Vec<String>,
}

impl Environment {
    /// Host port bound to `container_port`, if published.
    pub fn host_port(&self, container_port: &str) -> Option<&str> {
        self.ports.get(container_port).map(String::as_str)
    }
}

/// An isolated network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
}

/// Captured result of one exec.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i64, stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Container logs, split by stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogOutput {
    pub stdout: String,
    pub stderr: String,
}
