//! Error types for galion-supervisor

use std::time::Duration;

use thiserror::Error;

/// Errors raised while configuring or running a supervision pass.
///
/// Only [`DuplicateName`](SupervisorError::DuplicateName),
/// [`InvalidSpec`](SupervisorError::InvalidSpec) and
/// [`Config`](SupervisorError::Config) ever reach a caller. Launch and probe
/// errors are rendered into the owning service's status detail.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A service with this name is already registered
    #[error("duplicate service name: '{0}'")]
    DuplicateName(String),

    /// A service definition violates an invariant
    #[error("invalid service '{service}': {msg}")]
    InvalidSpec { service: String, msg: String },

    /// Configuration file could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// The start command could not be spawned
    #[error("launch failed for '{service}': {msg}")]
    Launch { service: String, msg: String },

    /// A single probe attempt exceeded its timeout
    #[error("probe of {target} timed out after {}ms", .timeout.as_millis())]
    ProbeTimeout { target: String, timeout: Duration },

    /// The probe reached its target but the answer did not match
    #[error("probe of {target} did not match: {msg}")]
    ProbeMismatch { target: String, msg: String },

    /// The probe could not reach its target at all
    #[error("probe of {target} failed: {msg}")]
    ProbeTransport { target: String, msg: String },
}

impl SupervisorError {
    /// True for errors that count as one failed probe attempt.
    pub fn is_probe_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::ProbeTimeout { .. }
                | SupervisorError::ProbeMismatch { .. }
                | SupervisorError::ProbeTransport { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
