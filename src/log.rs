//! Per-service log files.
//!
//! Launched services write stdout and stderr into one append-only file, the
//! way `nohup cmd >> service.log 2>&1 &` would. When a service ends up
//! unhealthy, the last lines of that file are attached to its status detail.

use std::fs::{File, OpenOptions};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::ServiceSpec;

/// Lines attached to an unhealthy service's detail.
pub const TAIL_LINES: usize = 20;

// Upper bound on bytes read from the end of a log file.
const TAIL_BYTES: u64 = 8 * 1024;

/// Where a service's output goes: explicit `log_file`, else `<log_dir>/<name>.log`.
pub fn log_path(spec: &ServiceSpec, log_dir: &Path) -> PathBuf {
    spec.log_file
        .clone()
        .unwrap_or_else(|| log_dir.join(format!("{}.log", spec.name)))
}

/// Open (creating parent directories) a log file for appending.
pub fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Return up to `n` trailing lines of `path`. Missing or unreadable files yield nothing.
pub async fn tail(path: &Path, n: usize) -> Vec<String> {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return vec![];
    };
    let Ok(len) = file.metadata().await.map(|m| m.len()) else {
        return vec![];
    };
    let start = len.saturating_sub(TAIL_BYTES);
    if file.seek(SeekFrom::Start(start)).await.is_err() {
        return vec![];
    }
    let mut buf = Vec::with_capacity((len - start) as usize);
    if file.read_to_end(&mut buf).await.is_err() {
        return vec![];
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // First line is likely cut in half when we started mid-file.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(n);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}

/// Render a tail for inclusion in a status detail.
pub fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n--- log tail ---");
    for l in lines {
        out.push('\n');
        out.push_str(l);
    }
    out
}
