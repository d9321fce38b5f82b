use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Pending,
    Starting,
    Healthy,
    Unhealthy,
    /// The start command could not be issued.
    Failed,
}

impl ServiceState {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceState::Pending => "pending",
            ServiceState::Starting => "starting",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy => "unhealthy",
            ServiceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Healthy | ServiceState::Unhealthy | ServiceState::Failed
        )
    }
}

/// Outcome of one service within a single supervision run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub attempts_made: u32,
    pub detail: String,
    pub pid: Option<u32>,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            state: ServiceState::Pending,
            last_checked_at: None,
            attempts_made: 0,
            detail: String::new(),
            pid: None,
        }
    }
}

impl ServiceStatus {
    pub fn starting(&mut self, pid: Option<u32>) {
        if self.transition(ServiceState::Starting) {
            self.pid = pid;
        }
    }

    pub fn failed(&mut self, detail: impl Into<String>) {
        if self.transition(ServiceState::Failed) {
            self.detail = detail.into();
        }
    }

    /// Record one probe attempt. `passed` moves the status to `Healthy`.
    pub fn record_attempt(&mut self, at: DateTime<Utc>, passed: bool, detail: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.attempts_made += 1;
        self.last_checked_at = Some(at);
        self.detail = detail.into();
        if passed {
            self.transition(ServiceState::Healthy);
        }
    }

    pub fn unhealthy(&mut self, detail: impl Into<String>) {
        if self.transition(ServiceState::Unhealthy) {
            self.detail = detail.into();
        }
    }

    // Terminal states stick for the rest of the run.
    fn transition(&mut self, next: ServiceState) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(
                "ignoring {} -> {} transition",
                self.state.label(),
                next.label()
            );
            return false;
        }
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_all_variants() {
        assert_eq!(ServiceState::Pending.label(), "pending");
        assert_eq!(ServiceState::Starting.label(), "starting");
        assert_eq!(ServiceState::Healthy.label(), "healthy");
        assert_eq!(ServiceState::Unhealthy.label(), "unhealthy");
        assert_eq!(ServiceState::Failed.label(), "failed");
    }

    #[test]
    fn test_new_status_is_pending() {
        let s = ServiceStatus::default();
        assert_eq!(s.state, ServiceState::Pending);
        assert_eq!(s.attempts_made, 0);
        assert!(s.last_checked_at.is_none());
    }

    #[test]
    fn test_attempts_then_healthy() {
        let mut s = ServiceStatus::default();
        s.starting(Some(42));
        s.record_attempt(Utc::now(), false, "HTTP 500");
        s.record_attempt(Utc::now(), true, "HTTP 200");
        assert_eq!(s.state, ServiceState::Healthy);
        assert_eq!(s.attempts_made, 2);
        assert_eq!(s.detail, "HTTP 200");
        assert_eq!(s.pid, Some(42));
    }

    #[test]
    fn test_terminal_state_sticks() {
        let mut s = ServiceStatus::default();
        s.failed("no such file");
        s.starting(Some(1));
        s.record_attempt(Utc::now(), true, "ok");
        assert_eq!(s.state, ServiceState::Failed);
        assert_eq!(s.attempts_made, 0);
        assert_eq!(s.detail, "no such file");
    }

    #[test]
    fn test_serializes_lowercase_state() {
        let s = ServiceStatus::default();
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["state"], "pending");
    }
}
