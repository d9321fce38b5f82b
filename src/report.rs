use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::state::{ServiceState, ServiceStatus};

/// Status of one service, keyed by name, as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub failed: usize,
    /// Not yet terminal: `pending` or `starting`.
    pub pending: usize,
}

/// Aggregate result of a supervision run, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisionReport {
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub services: Vec<ServiceReport>,
    pub summary: Summary,
}

impl SupervisionReport {
    pub fn new(services: Vec<ServiceReport>) -> Self {
        let summary = summarize(&services);
        Self {
            run_id: None,
            started_at: None,
            finished_at: None,
            cancelled: false,
            services,
            summary,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceStatus> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.status)
    }

    pub fn all_healthy(&self) -> bool {
        self.summary.healthy == self.summary.total
    }

    /// Services that did not end up healthy.
    pub fn failures(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services
            .iter()
            .filter(|s| s.status.state != ServiceState::Healthy)
    }

    /// 0 when every service is healthy, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.all_healthy() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<16} {:<10} {:<9} {:<8} {:<20} {}\n",
            "SERVICE".bold(),
            "STATE".bold(),
            "ATTEMPTS".bold(),
            "PID".bold(),
            "LAST CHECK".bold(),
            "DETAIL".bold(),
        ));
        out.push_str(&format!("{}\n", "─".repeat(88).dimmed()));
        for svc in &self.services {
            let st = &svc.status;
            let label = format!("{:<10}", st.state.label());
            let state = match st.state {
                ServiceState::Healthy => label.green(),
                ServiceState::Starting => label.yellow(),
                ServiceState::Unhealthy | ServiceState::Failed => label.red(),
                ServiceState::Pending => label.dimmed(),
            };
            let checked = st
                .last_checked_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!(
                "{:<16} {} {:<9} {:<8} {:<20} {}\n",
                svc.name,
                state,
                st.attempts_made,
                st.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                checked,
                first_line(&st.detail, 48).dimmed(),
            ));
        }
        out.push_str(&format!("{}\n", "─".repeat(88).dimmed()));

        let s = self.summary;
        let mut line = format!(
            "{} total, {} healthy, {} unhealthy, {} failed",
            s.total,
            s.healthy.to_string().green(),
            s.unhealthy.to_string().red(),
            s.failed.to_string().red(),
        );
        if s.pending > 0 {
            line.push_str(&format!(", {} pending", s.pending));
        }
        if self.cancelled {
            line.push_str(&format!(" {}", "(cancelled)".yellow()));
        }
        out.push_str(&line);
        out.push('\n');

        for svc in self.failures().filter(|s| !s.status.detail.is_empty()) {
            out.push_str(&format!(
                "\n{} {}\n",
                format!("[{}]", svc.name).red().bold(),
                svc.status.state.label()
            ));
            for l in svc.status.detail.lines() {
                out.push_str(&format!("  {l}\n"));
            }
        }
        out
    }
}

fn summarize(services: &[ServiceReport]) -> Summary {
    let mut s = Summary {
        total: services.len(),
        ..Summary::default()
    };
    for svc in services {
        match svc.status.state {
            ServiceState::Healthy => s.healthy += 1,
            ServiceState::Unhealthy => s.unhealthy += 1,
            ServiceState::Failed => s.failed += 1,
            ServiceState::Pending | ServiceState::Starting => s.pending += 1,
        }
    }
    s
}

fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
