use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ServiceSpec;
use crate::error::{Result, SupervisorError};
use crate::log::open_append;

/// A process that was started successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launched {
    pub pid: Option<u32>,
}

/// Starts a service's process and lets go of it.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &ServiceSpec, log_path: &Path) -> Result<Launched>;
}

/// Spawns `spec.cmd` directly (no shell), with stdout and stderr appended to `log_path`.
///
/// The child gets its own process group so an interrupt aimed at the
/// supervisor does not reach it, and it is never killed on drop.
pub struct CommandLauncher;

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, spec: &ServiceSpec, log_path: &Path) -> Result<Launched> {
        let fail = |msg: String| SupervisorError::Launch {
            service: spec.name.clone(),
            msg,
        };

        if let Some(dir) = &spec.dir {
            let is_dir = tokio::fs::metadata(dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                return Err(fail(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }

        let parts = split_cmd(&spec.cmd);
        let Some((program, args)) = parts.split_first() else {
            return Err(fail("empty command".into()));
        };

        let path = log_path.to_path_buf();
        let (log, log_err) = tokio::task::spawn_blocking(move || {
            let log = open_append(&path)?;
            let log_err = log.try_clone()?;
            Ok::<_, std::io::Error>((log, log_err))
        })
        .await
        .map_err(|e| fail(format!("log file task failed: {e}")))?
        .map_err(|e| fail(format!("cannot open log file {}: {e}", log_path.display())))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        if let Some(dir) = &spec.dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => fail(format!("executable '{program}' not found")),
            ErrorKind::PermissionDenied => fail(format!("permission denied running '{program}'")),
            _ => fail(format!("spawn '{program}': {e}")),
        })?;
        let pid = child.id();

        // Reap on exit so a dead child cannot pass a liveness probe as a zombie.
        let name = spec.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("[{name}] process exited ({status})"),
                Err(e) => tracing::warn!("[{name}] wait failed: {e}"),
            }
        });

        Ok(Launched { pid })
    }
}

/// Shell-style command splitting: handles single/double quotes and backslash escapes.
/// e.g. `pm2 start server.js --name 'galion api'` → ["pm2", "start", "server.js", "--name", "galion api"]
pub fn split_cmd(cmd: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut chars = cmd.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut quoted = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                quoted = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                quoted = true;
            }
            ' ' | '\t' if !in_single && !in_double => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                    quoted = false;
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() || quoted {
        args.push(current);
    }
    args
}
