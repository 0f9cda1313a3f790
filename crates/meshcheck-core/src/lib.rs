//! meshcheck core library
//!
//! Brings up a mesh-VPN control plane and a fleet of clients in throwaway
//! containers, joins the fleet, verifies membership, addressing, peer status
//! and all-pairs direct reachability, keeps the logs of failed runs, and
//! tears everything down again.

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod outcome;
pub mod readiness;
pub mod telemetry;
pub mod verify;

pub use bootstrap::FleetBootstrap;
pub use commands::{ClientCommands, ControlPlaneCommands, RemoteCommand};
pub use config::{ConvergenceStrategy, HarnessConfig};
pub use context::{ControlPlane, RunContext};
pub use error::{CommandError, HarnessError, Result, SetupStep};
pub use executor::RemoteExecutor;
pub use fleet::{EnrollmentCredential, Fleet, FleetMember};
pub use health::{FnHealthCheck, HealthCheck, HttpHealthCheck};
pub use lifecycle::{teardown, RunLifecycle, RunPhase};
pub use outcome::{render_summary, write_report, RunOutcome, RunReport};
pub use readiness::{retry_until, BackoffPolicy};
pub use verify::{CheckKind, CheckReport, SubCaseResult};

/// Crate version, as reported by `meshcheck --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
