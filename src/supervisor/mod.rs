use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::config::{ServiceSpec, SupervisorConfig, SupervisorSettings};
use crate::error::{Result, SupervisorError};
use crate::health::{HealthChecker, WaitOutcome};
use crate::log::{format_tail, log_path, tail, TAIL_LINES};
use crate::process_table::{ProcessTable, SystemProcessTable};
use crate::report::{ServiceReport, SupervisionReport};
use crate::state::ServiceStatus;

pub use launch::{split_cmd, CommandLauncher, Launched, Launcher};

mod launch;

#[derive(Debug, Default, Clone)]
struct RunInfo {
    run_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    cancelled: bool,
}

/// Launches registered services and probes them until each is healthy or out of retries.
///
/// `register` needs `&mut self`; `run_all` and `report` only `&self`, so a
/// shared `Arc<Supervisor>` can be inspected from another task mid-run.
pub struct Supervisor {
    settings: SupervisorSettings,
    specs: IndexMap<String, ServiceSpec>,
    statuses: Mutex<IndexMap<String, ServiceStatus>>,
    run: Mutex<RunInfo>,
    launcher: Arc<dyn Launcher>,
    process_table: Arc<dyn ProcessTable>,
    http: reqwest::Client,
    /// Token for the current (or next) run; replaced once a run finishes.
    cancel: Mutex<CancellationToken>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            specs: IndexMap::new(),
            statuses: Mutex::new(IndexMap::new()),
            run: Mutex::new(RunInfo::default()),
            launcher: Arc::new(CommandLauncher),
            process_table: Arc::new(SystemProcessTable),
            http: reqwest::Client::new(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Build a supervisor with every service of `cfg` registered in file order.
    pub fn from_config(cfg: &SupervisorConfig) -> Result<Self> {
        let mut sup = Self::new(cfg.settings.clone());
        for spec in cfg.services.values() {
            sup.register(spec.clone())?;
        }
        Ok(sup)
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.process_table = table;
        self
    }

    /// Cancelling this token makes the current (or, if none is in progress, the next)
    /// `run_all` stop launching and probing. Processes already running are left alone.
    /// Each run gets a fresh token once it finishes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock_cancel().clone()
    }

    pub fn register(&mut self, spec: ServiceSpec) -> Result<()> {
        if self.specs.contains_key(&spec.name) {
            return Err(SupervisorError::DuplicateName(spec.name));
        }
        spec.validate()?;
        self.lock_statuses()
            .insert(spec.name.clone(), ServiceStatus::default());
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// One supervision pass over every registered service.
    ///
    /// Never fails: per-service problems end up in that service's status.
    pub async fn run_all(&self) -> SupervisionReport {
        let cancel = self.cancellation_token();
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        {
            let mut statuses = self.lock_statuses();
            for status in statuses.values_mut() {
                *status = ServiceStatus::default();
            }
        }
        *self.lock_run() = RunInfo {
            run_id: Some(run_id.clone()),
            started_at: Some(Utc::now()),
            ..RunInfo::default()
        };
        tracing::info!(
            "{run_id}: supervising {} service(s) ({})",
            self.specs.len(),
            if self.settings.concurrent {
                "concurrent"
            } else {
                "sequential"
            }
        );

        let interrupted: Vec<bool> = if self.settings.concurrent {
            join_all(
                self.specs
                    .values()
                    .map(|spec| self.supervise(spec, &cancel)),
            )
            .await
        } else {
            let mut out = Vec::with_capacity(self.specs.len());
            for spec in self.specs.values() {
                out.push(self.supervise(spec, &cancel).await);
            }
            out
        };

        // Only services that were actually cut short make the run count as cancelled.
        let cancelled = interrupted.contains(&true);
        {
            let mut run = self.lock_run();
            run.finished_at = Some(Utc::now());
            run.cancelled = cancelled;
        }

        let report = self.report();
        *self.lock_cancel() = CancellationToken::new();
        let s = report.summary;
        tracing::info!(
            "{run_id}: {} healthy, {} unhealthy, {} failed",
            s.healthy,
            s.unhealthy,
            s.failed
        );
        report
    }

    /// Snapshot of the current run. Does not probe anything.
    pub fn report(&self) -> SupervisionReport {
        let services = {
            let statuses = self.lock_statuses();
            self.specs
                .keys()
                .map(|name| ServiceReport {
                    name: name.clone(),
                    status: statuses.get(name).cloned().unwrap_or_default(),
                })
                .collect()
        };
        let run = self.lock_run().clone();
        let mut report = SupervisionReport::new(services);
        report.run_id = run.run_id;
        report.started_at = run.started_at;
        report.finished_at = run.finished_at;
        report.cancelled = run.cancelled;
        report
    }

    /// Launch and probe one service. Returns true if cancellation cut it short.
    async fn supervise(&self, spec: &ServiceSpec, cancel: &CancellationToken) -> bool {
        let name = spec.name.as_str();
        if cancel.is_cancelled() {
            self.update(name, |s| s.detail = "run cancelled before launch".into());
            return true;
        }

        let log_file = log_path(spec, &self.settings.log_dir);
        tracing::info!("[{name}] launching `{}`", spec.cmd);
        let launched = match self.launcher.launch(spec, &log_file).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("[{name}] {e}");
                self.update(name, |s| s.failed(e.to_string()));
                return false;
            }
        };
        self.update(name, |s| s.starting(launched.pid));
        tracing::debug!(
            "[{name}] started (pid {}), logging to {}",
            launched
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".into()),
            log_file.display()
        );

        let checker = HealthChecker::for_service(spec, &self.http, self.process_table.clone());
        let outcome = checker
            .wait_healthy(launched.pid, cancel, |attempt| {
                self.update(name, |s| {
                    s.record_attempt(attempt.at, attempt.passed, attempt.detail)
                });
            })
            .await;

        let (attempts, last) = {
            let statuses = self.lock_statuses();
            statuses
                .get(name)
                .map(|s| (s.attempts_made, s.detail.clone()))
                .unwrap_or_default()
        };
        match outcome {
            WaitOutcome::Healthy => {
                tracing::info!("[{name}] healthy after {attempts} attempt(s)");
                false
            }
            WaitOutcome::Exhausted => {
                let mut detail = if checker.max_retries() == 0 {
                    "no probe attempts configured (retries = 0)".to_string()
                } else {
                    last
                };
                detail.push_str(&format_tail(&tail(&log_file, TAIL_LINES).await));
                tracing::warn!(
                    "[{name}] unhealthy after {attempts}/{} attempt(s)",
                    checker.max_retries()
                );
                self.update(name, |s| s.unhealthy(detail));
                false
            }
            WaitOutcome::Cancelled => {
                tracing::warn!("[{name}] probing cancelled after {attempts} attempt(s)");
                let detail = if last.is_empty() {
                    format!("cancelled after {attempts} probe attempt(s)")
                } else {
                    format!("cancelled after {attempts} probe attempt(s); last: {last}")
                };
                self.update(name, |s| s.unhealthy(detail));
                true
            }
        }
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut ServiceStatus)) {
        if let Some(status) = self.lock_statuses().get_mut(name) {
            f(status);
        }
    }

    // A poisoned lock only means another probe task panicked mid-update;
    // the map itself is still consistent.
    fn lock_statuses(&self) -> MutexGuard<'_, IndexMap<String, ServiceStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_run(&self) -> MutexGuard<'_, RunInfo> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cancel(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
