use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{HealthCheck, ServiceSpec};
use crate::error::{Result, SupervisorError};
use crate::process_table::ProcessTable;

/// One readiness check. `Ok` carries a short description of what passed.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, pid: Option<u32>) -> Result<String>;

    /// What is being probed, for log lines and error messages.
    fn target(&self) -> String;
}

pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    expect_status: Option<u16>,
    expect_body: Option<String>,
    request_timeout: Duration,
}

impl HttpProbe {
    pub fn new(
        client: reqwest::Client,
        url: String,
        expect_status: Option<u16>,
        expect_body: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            url,
            expect_status,
            expect_body,
            request_timeout,
        }
    }
}

/// Decide whether an HTTP answer counts as healthy.
///
/// Without expectations any 2xx passes. An expected body substring is its own
/// gate: alone it ignores the status, together with `expect_status` both must hold.
pub fn evaluate_http(
    status: u16,
    body: Option<&str>,
    expect_status: Option<u16>,
    expect_body: Option<&str>,
) -> std::result::Result<(), String> {
    match expect_status {
        Some(want) if status != want => {
            return Err(format!("HTTP {status}, expected {want}"));
        }
        None if expect_body.is_none() && !(200..300).contains(&status) => {
            return Err(format!("HTTP {status}, expected 2xx"));
        }
        _ => {}
    }
    if let Some(needle) = expect_body {
        if !body.unwrap_or_default().contains(needle) {
            return Err(format!("HTTP {status}, body does not contain '{needle}'"));
        }
    }
    Ok(())
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, _pid: Option<u32>) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status().as_u16();
        let body = match &self.expect_body {
            Some(_) => Some(resp.text().await.map_err(|e| self.transport_error(e))?),
            None => None,
        };
        evaluate_http(
            status,
            body.as_deref(),
            self.expect_status,
            self.expect_body.as_deref(),
        )
        .map_err(|msg| SupervisorError::ProbeMismatch {
            target: self.url.clone(),
            msg,
        })?;
        Ok(format!("HTTP {status}"))
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

impl HttpProbe {
    fn transport_error(&self, e: reqwest::Error) -> SupervisorError {
        if e.is_timeout() {
            SupervisorError::ProbeTimeout {
                target: self.url.clone(),
                timeout: self.request_timeout,
            }
        } else {
            SupervisorError::ProbeTransport {
                target: self.url.clone(),
                msg: error_chain(&e),
            }
        }
    }
}

// reqwest's top-level Display hides "connection refused" in the source chain.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: String) -> Self {
        Self { address }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self, _pid: Option<u32>) -> Result<String> {
        TcpStream::connect(self.address.as_str())
            .await
            .map_err(|e| SupervisorError::ProbeTransport {
                target: self.target(),
                msg: e.to_string(),
            })?;
        Ok(format!("connected to {}", self.address))
    }

    fn target(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Liveness: the launched PID, or a process matching `name`, is in the process table.
pub struct ProcessProbe {
    table: Arc<dyn ProcessTable>,
    name: Option<String>,
}

impl ProcessProbe {
    pub fn new(table: Arc<dyn ProcessTable>, name: Option<String>) -> Self {
        Self { table, name }
    }
}

#[async_trait]
impl HealthProbe for ProcessProbe {
    async fn check(&self, pid: Option<u32>) -> Result<String> {
        let mismatch = |msg: String| SupervisorError::ProbeMismatch {
            target: self.target(),
            msg,
        };
        match (&self.name, pid) {
            (Some(name), _) => match self.table.find_by_name(name).await {
                Some(found) => Ok(format!("process '{name}' running (pid {found})")),
                None => Err(mismatch(format!("no running process named '{name}'"))),
            },
            (None, Some(pid)) => {
                if self.table.is_running(pid).await {
                    Ok(format!("pid {pid} running"))
                } else {
                    Err(mismatch(format!("pid {pid} is not running")))
                }
            }
            (None, None) => Err(mismatch("launched process reported no pid".into())),
        }
    }

    fn target(&self) -> String {
        match &self.name {
            Some(name) => format!("process '{name}'"),
            None => "launched process".into(),
        }
    }
}

/// Result of polling one service until it passes or runs out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Healthy,
    Exhausted,
    Cancelled,
}

/// A single probe attempt, handed to the caller as it happens.
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub number: u32,
    pub at: DateTime<Utc>,
    pub passed: bool,
    pub detail: String,
}

pub struct HealthChecker {
    probe: Box<dyn HealthProbe>,
    timeout: Duration,
    interval: Duration,
    max_retries: u32,
    initial_delay: Duration,
}

impl HealthChecker {
    pub fn for_service(
        spec: &ServiceSpec,
        client: &reqwest::Client,
        table: Arc<dyn ProcessTable>,
    ) -> Self {
        let probe: Box<dyn HealthProbe> = match &spec.health {
            HealthCheck::Http {
                url,
                expect_status,
                expect_body,
            } => Box::new(HttpProbe::new(
                client.clone(),
                url.clone(),
                *expect_status,
                expect_body.clone(),
                spec.timeout,
            )),
            HealthCheck::Tcp { address } => Box::new(TcpProbe::new(address.clone())),
            HealthCheck::Process { name } => Box::new(ProcessProbe::new(table, name.clone())),
        };
        Self::with_probe(probe, spec)
    }

    pub fn with_probe(probe: Box<dyn HealthProbe>, spec: &ServiceSpec) -> Self {
        Self {
            probe,
            timeout: spec.timeout,
            interval: spec.interval,
            max_retries: spec.max_retries,
            initial_delay: spec.initial_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// One attempt, bounded by the per-attempt timeout.
    pub async fn probe_once(&self, pid: Option<u32>) -> Result<String> {
        match timeout(self.timeout, self.probe.check(pid)).await {
            Ok(r) => r,
            Err(_) => Err(SupervisorError::ProbeTimeout {
                target: self.probe.target(),
                timeout: self.timeout,
            }),
        }
    }

    /// Probe up to `max_retries` times, `interval` apart, stopping at the first pass.
    /// Every attempt is reported through `on_attempt` before the next one starts.
    pub async fn wait_healthy<F>(
        &self,
        pid: Option<u32>,
        cancel: &CancellationToken,
        mut on_attempt: F,
    ) -> WaitOutcome
    where
        F: FnMut(ProbeAttempt) + Send,
    {
        if !self.initial_delay.is_zero() && !sleep_or_cancel(self.initial_delay, cancel).await {
            return WaitOutcome::Cancelled;
        }
        for number in 1..=self.max_retries {
            if number > 1 && !sleep_or_cancel(self.interval, cancel).await {
                return WaitOutcome::Cancelled;
            }
            let result = tokio::select! {
                r = self.probe_once(pid) => r,
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            };
            let passed = result.is_ok();
            let detail = match result {
                Ok(d) => d,
                Err(e) if e.is_probe_failure() => e.to_string(),
                Err(e) => {
                    tracing::warn!("probe of {} errored: {e}", self.probe.target());
                    e.to_string()
                }
            };
            tracing::debug!(
                "probe {number}/{} of {}: {detail}",
                self.max_retries,
                self.probe.target()
            );
            on_attempt(ProbeAttempt {
                number,
                at: Utc::now(),
                passed,
                detail,
            });
            if passed {
                return WaitOutcome::Healthy;
            }
        }
        WaitOutcome::Exhausted
    }
}

/// Sleep for `d`; false if cancelled first.
async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = cancel.cancelled() => false,
    }
}
