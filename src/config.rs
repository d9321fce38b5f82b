use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Result, SupervisorError};

/// Parsed `Supervisorfile.hcl`: global settings plus services in file order.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    pub settings: SupervisorSettings,
    pub services: IndexMap<String, ServiceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Probe every service in its own task instead of one after another.
    #[serde(default = "default_true")]
    pub concurrent: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            concurrent: true,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from(".supervisor/logs")
}
fn default_true() -> bool {
    true
}

/// How readiness of a launched service is decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    /// GET `url`. Any 2xx passes unless `expect_status` or `expect_body` is set.
    Http {
        url: String,
        expect_status: Option<u16>,
        expect_body: Option<String>,
    },
    /// A TCP connect to `address` succeeds.
    Tcp { address: String },
    /// The launched PID (or a process whose name matches) is in the process table.
    Process { name: Option<String> },
}

impl HealthCheck {
    pub fn http(url: impl Into<String>) -> Self {
        HealthCheck::Http {
            url: url.into(),
            expect_status: None,
            expect_body: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HealthCheck::Http { .. } => "http",
            HealthCheck::Tcp { .. } => "tcp",
            HealthCheck::Process { .. } => "process",
        }
    }
}

/// One process to launch and probe. Supplied by the caller, never mutated.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub cmd: String,
    pub dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Destination of stdout and stderr. `None` falls back to `<log_dir>/<name>.log`.
    pub log_file: Option<PathBuf>,
    pub health: HealthCheck,
    pub timeout: Duration,
    pub interval: Duration,
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, health: HealthCheck) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            dir: None,
            env: HashMap::new(),
            log_file: None,
            health,
            timeout: default_timeout(),
            interval: default_interval(),
            max_retries: default_retries(),
            initial_delay: Duration::ZERO,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_retries(mut self, max_retries: u32, interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| SupervisorError::InvalidSpec {
            service: self.name.clone(),
            msg: msg.to_string(),
        };
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must be non-empty and contain no whitespace"));
        }
        if self.cmd.trim().is_empty() {
            return Err(invalid("cmd is empty"));
        }
        if self.interval.is_zero() {
            return Err(invalid("retry interval must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("probe timeout must be greater than zero"));
        }
        match &self.health {
            HealthCheck::Http { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Err(invalid(&format!("health url '{url}' is not http(s)")))
            }
            HealthCheck::Tcp { address } if address.is_empty() => {
                Err(invalid("tcp health check needs an address"))
            }
            HealthCheck::Process { name: Some(n) } if n.trim().is_empty() => {
                Err(invalid("process name is empty"))
            }
            _ => Ok(()),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_retries() -> u32 {
    3
}

// Raw HCL shapes, converted into ServiceSpec once the block label is known.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceBlock {
    cmd: String,
    #[serde(default)]
    dir: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    log: Option<PathBuf>,
    health: HealthBlock,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HealthBlock {
    #[serde(rename = "type")]
    kind: HealthKind,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    process: Option<String>,
    #[serde(default = "default_interval", with = "duration_serde")]
    interval: Duration,
    #[serde(default = "default_timeout", with = "duration_serde")]
    timeout: Duration,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default, with = "duration_serde")]
    initial_delay: Duration,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
enum HealthKind {
    Http,
    Tcp,
    Process,
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }
        if let Some(v) = s.strip_suffix('s') {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string());
        }
        Err(format!("unknown duration format: '{s}' (use '2s' or '500ms')"))
    }
}

impl ServiceBlock {
    fn into_spec(self, name: &str, base: &Path) -> Result<ServiceSpec> {
        let h = self.health;
        let missing = |field: &str| SupervisorError::InvalidSpec {
            service: name.to_string(),
            msg: format!("{} health check needs '{field}'", h.kind_name()),
        };
        let health = match h.kind {
            HealthKind::Http => HealthCheck::Http {
                url: h.url.clone().ok_or_else(|| missing("url"))?,
                expect_status: h.status,
                expect_body: h.body.clone(),
            },
            HealthKind::Tcp => HealthCheck::Tcp {
                address: h.address.clone().ok_or_else(|| missing("address"))?,
            },
            HealthKind::Process => HealthCheck::Process {
                name: h.process.clone(),
            },
        };
        Ok(ServiceSpec {
            name: name.to_string(),
            cmd: self.cmd,
            dir: self.dir.map(|d| resolve(base, d)),
            env: self.env,
            log_file: self.log.map(|l| resolve(base, l)),
            health,
            timeout: h.timeout,
            interval: h.interval,
            max_retries: h.retries,
            initial_delay: h.initial_delay,
        })
    }
}

impl HealthBlock {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            HealthKind::Http => "http",
            HealthKind::Tcp => "tcp",
            HealthKind::Process => "process",
        }
    }
}

fn resolve(base: &Path, p: PathBuf) -> PathBuf {
    if p.is_relative() {
        base.join(p)
    } else {
        p
    }
}

impl SupervisorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| SupervisorError::Config(format!("cannot read {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&src, base)
            .map_err(|e| match e {
                SupervisorError::Config(msg) => {
                    SupervisorError::Config(format!("{}: {msg}", path.display()))
                }
                other => other,
            })
    }

    /// Parse HCL source; relative paths are resolved against `base`.
    pub fn parse(src: &str, base: &Path) -> Result<Self> {
        let body: hcl::Body =
            hcl::parse(src).map_err(|e| SupervisorError::Config(format!("parse error: {e}")))?;

        if let Some(attr) = body.attributes().next() {
            return Err(SupervisorError::Config(format!(
                "unexpected top-level attribute '{}'",
                attr.key.as_str()
            )));
        }

        let mut cfg = SupervisorConfig::default();
        for block in body.blocks() {
            match block.identifier.as_str() {
                "supervisor" => {
                    let mut settings: SupervisorSettings = hcl::from_body(block.body.clone())
                        .map_err(|e| SupervisorError::Config(format!("supervisor block: {e}")))?;
                    settings.log_dir = resolve(base, settings.log_dir);
                    cfg.settings = settings;
                }
                "service" => {
                    let [label] = block.labels.as_slice() else {
                        return Err(SupervisorError::Config(
                            "service block needs exactly one label, e.g. service \"api\" { ... }"
                                .into(),
                        ));
                    };
                    let name = label.as_str().to_string();
                    if cfg.services.contains_key(&name) {
                        return Err(SupervisorError::DuplicateName(name));
                    }
                    let raw: ServiceBlock = hcl::from_body(block.body.clone()).map_err(|e| {
                        SupervisorError::Config(format!("service '{name}': {e}"))
                    })?;
                    let spec = raw.into_spec(&name, base)?;
                    cfg.services.insert(name, spec);
                }
                other => {
                    return Err(SupervisorError::Config(format!("unknown block '{other}'")));
                }
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for spec in self.services.values() {
            spec.validate()?;
        }
        Ok(())
    }
}
