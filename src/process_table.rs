use std::path::Path;

use async_trait::async_trait;

/// Read-only view of the running-process table.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    async fn is_running(&self, pid: u32) -> bool;

    /// PID of a running process whose command name or argv[0] matches `name`.
    async fn find_by_name(&self, name: &str) -> Option<u32>;
}

/// Backed by the OS: signal 0 for PIDs, `/proc` for name lookups.
pub struct SystemProcessTable;

#[async_trait]
impl ProcessTable for SystemProcessTable {
    async fn is_running(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    async fn find_by_name(&self, name: &str) -> Option<u32> {
        let name = name.to_string();
        tokio::task::spawn_blocking(move || scan_proc(Path::new("/proc"), &name))
            .await
            .ok()
            .flatten()
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // EPERM still means the process exists, it just isn't ours.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

/// Walk `root` (a procfs mount) looking for a process named `name`.
fn scan_proc(root: &Path, name: &str) -> Option<u32> {
    let entries = std::fs::read_dir(root).ok()?;
    let own = std::process::id();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own {
            continue;
        }
        let dir = entry.path();
        if let Ok(comm) = std::fs::read_to_string(dir.join("comm")) {
            if comm.trim_end() == name {
                return Some(pid);
            }
        }
        if let Ok(cmdline) = std::fs::read(dir.join("cmdline")) {
            if argv0_matches(&cmdline, name) {
                return Some(pid);
            }
        }
    }
    None
}

/// `cmdline` is NUL-separated; compare the basename of argv[0].
fn argv0_matches(cmdline: &[u8], name: &str) -> bool {
    let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    let argv0 = String::from_utf8_lossy(argv0);
    let base = argv0.rsplit('/').next().unwrap_or_default();
    !base.is_empty() && base == name
}
