//! # galion-supervisor
//!
//! Launch a fixed set of named services, poll each one for health with
//! bounded retries, and produce a single consolidated report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use galion_supervisor::{HealthCheck, ServiceSpec, Supervisor, SupervisorSettings};
//!
//! # async fn example() -> galion_supervisor::Result<()> {
//! let mut sup = Supervisor::new(SupervisorSettings::default());
//! sup.register(
//!     ServiceSpec::new("backend", "uvicorn main:app --port 8000", HealthCheck::http("http://localhost:8000/health"))
//!         .with_dir("./backend")
//!         .with_retries(5, Duration::from_secs(2)),
//! )?;
//!
//! let report = sup.run_all().await;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Supervisor** — owns the registered specs and the statuses of the current run
//! - **Launcher** trait — spawns a service's process and detaches from it
//! - **HealthProbe** trait — HTTP, TCP, and process-liveness readiness checks
//! - **ProcessTable** trait — PID and name lookups for liveness probes
//! - **SupervisionReport** — ordered per-service results plus a summary

pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod process_table;
pub mod report;
pub mod state;
pub mod supervisor;

pub use config::{HealthCheck, ServiceSpec, SupervisorConfig, SupervisorSettings};
pub use error::{Result, SupervisorError};
pub use health::{HealthChecker, HealthProbe, HttpProbe, ProcessProbe, TcpProbe, WaitOutcome};
pub use process_table::{ProcessTable, SystemProcessTable};
pub use report::{ServiceReport, Summary, SupervisionReport};
pub use state::{ServiceState, ServiceStatus};
pub use supervisor::{CommandLauncher, Launched, Launcher, Supervisor};
