//! meshcheck - end-to-end verification of a mesh-VPN control plane
//!
//! ## Commands
//!
//! - `run`: provision the fleet, verify it, tear it down
//! - `config`: print the effective configuration as TOML

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use meshcheck_core::config::split_list;
use meshcheck_core::telemetry::{init_tracing, LogFormat};
use meshcheck_core::{
    render_summary, CheckKind, FleetBootstrap, HarnessConfig, HttpHealthCheck, RunContext,
    RunLifecycle,
};
use meshcheck_provision::DockerCli;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "meshcheck")]
#[command(author = "Stevedores Org")]
#[command(version = meshcheck_core::VERSION)]
#[command(
    about = "End-to-end verification harness for a mesh-VPN control plane",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the control plane and fleet, verify, tear down
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of client nodes
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Comma separated client versions, assigned round-robin
    #[arg(long)]
    versions: Option<String>,

    /// Run only these checks (repeatable)
    #[arg(long = "check", value_parser = parse_check)]
    checks: Vec<CheckKind>,

    /// Where logs of a failed run are written
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Docker-compatible CLI binary
    #[arg(long)]
    container_cli: Option<String>,
}

impl RunArgs {
    /// Flags win over file and environment.
    fn apply(&self, cfg: &mut HarnessConfig) {
        if let Some(nodes) = self.nodes {
            cfg.clients.count = nodes;
        }
        if let Some(versions) = &self.versions {
            cfg.clients.versions = split_list(versions);
        }
        if !self.checks.is_empty() {
            cfg.verification.checks = self.checks.clone();
        }
        if let Some(dir) = &self.log_dir {
            cfg.diagnostics.log_dir = dir.clone();
        }
        if let Some(report) = &self.report {
            cfg.diagnostics.report_path = Some(report.clone());
        }
        if let Some(cli) = &self.container_cli {
            cfg.backend.container_cli = cli.clone();
        }
    }
}

fn parse_check(raw: &str) -> std::result::Result<CheckKind, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

/// Defaults, then the file, then `MESHCHECK_*` variables.
fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let mut cfg = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("load {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    cfg.apply_env().context("apply MESHCHECK_* overrides")?;
    Ok(cfg)
}

fn cmd_config(path: Option<&Path>) -> Result<()> {
    let cfg = load_config(path)?;
    print!("{}", cfg.to_toml()?);
    Ok(())
}

async fn cmd_run(args: &RunArgs) -> Result<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    let mut docker = DockerCli::new(&cfg.backend.container_cli);
    if let Some(secs) = cfg.backend.op_timeout_secs {
        docker = docker.with_op_timeout(Duration::from_secs(secs));
    }
    let health = HttpHealthCheck::new(Duration::from_millis(cfg.readiness.request_timeout_ms))?;
    let workdir = std::env::current_dir().context("resolve working directory")?;

    info!(
        nodes = cfg.clients.count,
        versions = %cfg.clients.versions.join(","),
        backend = %cfg.backend.container_cli,
        "Starting meshcheck run"
    );

    let mut ctx = RunContext::new(Arc::new(cfg), Arc::new(docker));
    let lifecycle = RunLifecycle::new(FleetBootstrap::new(Arc::new(health), workdir));
    let report = lifecycle.run(&mut ctx).await;

    print!("{}", render_summary(&report));
    if !report.passed() {
        bail!(
            "run {} failed ({} failed sub-case(s))",
            report.run_id,
            report.failed_subcases().len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "meshcheck",
            "--verbose",
            "run",
            "--nodes",
            "4",
            "--versions",
            "1.16.0,1.14.3",
            "--check",
            "membership",
            "--check",
            "reachability",
            "--report",
            "out/report.json",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.nodes, Some(4));
        assert_eq!(args.checks, vec![CheckKind::Membership, CheckKind::Reachability]);
    }

    #[test]
    fn test_unknown_check_rejected() {
        assert!(Cli::try_parse_from(["meshcheck", "run", "--check", "latency"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = RunArgs {
            nodes: Some(3),
            versions: Some("1.16.0".to_string()),
            checks: vec![CheckKind::Addresses],
            log_dir: Some(PathBuf::from("/tmp/mc")),
            container_cli: Some("podman".to_string()),
            ..Default::default()
        };
        let mut cfg = HarnessConfig::default();
        args.apply(&mut cfg);

        assert_eq!(cfg.clients.count, 3);
        assert_eq!(cfg.clients.versions, vec!["1.16.0"]);
        assert_eq!(cfg.verification.checks, vec![CheckKind::Addresses]);
        assert_eq!(cfg.diagnostics.log_dir, PathBuf::from("/tmp/mc"));
        assert_eq!(cfg.backend.container_cli, "podman");
        assert!(cfg.diagnostics.report_path.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshcheck.toml");
        std::fs::write(&path, "[clients]\ncount = 2\nversions = [\"1.14.3\"]\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.clients.versions, vec!["1.14.3"]);
        assert_eq!(cfg.control_plane.name, "headscale");
    }

    #[test]
    fn test_missing_config_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/meshcheck.toml"))).is_err());
    }
}
