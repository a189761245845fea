//! Locating a runtime's diagnostics endpoint and probing process liveness.
//!
//! On Unix each runtime publishes `dotnet-diagnostic-{pid}-{disambiguator}-socket`
//! in the temp directory; a recycled pid can leave stale sockets behind, so the
//! most recently modified match wins. On Windows the endpoint is the named
//! pipe `\\.\pipe\dotnet-diagnostic-{pid}`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::{AppError, Result};

/// Resolve the diagnostics endpoint of `pid`.
///
/// # Errors
///
/// Returns `AppError::ProcessUnreachable` if no endpoint is published.
#[cfg(unix)]
pub fn resolve(diagnostics_dir: &Path, pid: u32) -> Result<PathBuf> {
    let pattern = diagnostics_dir
        .join(format!("dotnet-diagnostic-{pid}-*-socket"))
        .to_string_lossy()
        .into_owned();
    let escaped = escape_dir(diagnostics_dir, &pattern);

    let newest = glob::glob(&escaped)
        .map_err(|err| AppError::Config(format!("invalid diagnostics dir pattern: {err}")))?
        .filter_map(std::result::Result::ok)
        .filter_map(|path| {
            let modified = path.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path);

    newest.ok_or_else(|| AppError::ProcessUnreachable {
        pid,
        reason: format!(
            "no diagnostics endpoint published in {}",
            diagnostics_dir.display()
        ),
    })
}

/// Resolve the diagnostics endpoint of `pid`.
///
/// # Errors
///
/// Never fails on Windows; reachability is decided at connect time.
#[cfg(windows)]
pub fn resolve(_diagnostics_dir: &Path, pid: u32) -> Result<PathBuf> {
    Ok(PathBuf::from(format!(r"\\.\pipe\dotnet-diagnostic-{pid}")))
}

#[cfg(unix)]
fn escape_dir(dir: &Path, pattern: &str) -> String {
    let dir = dir.to_string_lossy();
    match pattern.strip_prefix(dir.as_ref()) {
        Some(rest) => format!("{}{rest}", glob::Pattern::escape(&dir)),
        None => pattern.to_owned(),
    }
}

/// Pids of every runtime currently publishing a diagnostics endpoint.
///
/// # Errors
///
/// Returns `AppError::Io` if the endpoint directory cannot be listed.
pub fn published_pids(diagnostics_dir: &Path) -> Result<Vec<u32>> {
    #[cfg(windows)]
    let (dir, name_pattern) = {
        let _ = diagnostics_dir;
        (PathBuf::from(r"\\.\pipe\"), r"^dotnet-diagnostic-(\d+)$")
    };
    #[cfg(unix)]
    let (dir, name_pattern) = (
        diagnostics_dir.to_path_buf(),
        r"^dotnet-diagnostic-(\d+)-\d+-socket$",
    );

    let matcher = Regex::new(name_pattern)
        .map_err(|err| AppError::Config(format!("invalid endpoint pattern: {err}")))?;

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(AppError::Io(format!(
                "cannot list {}: {err}",
                dir.display()
            )))
        }
    };

    let pids: BTreeSet<u32> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            matcher.captures(name)?.get(1)?.as_str().parse().ok()
        })
        .collect();

    debug!(count = pids.len(), dir = %dir.display(), "enumerated diagnostics endpoints");
    Ok(pids.into_iter().collect())
}

/// Whether a process with `pid` currently exists.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        // EPERM: exists, owned by someone else.
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with `pid` currently exists.
///
/// Windows has no cheap existence probe without extra bindings; the pipe
/// connect that follows decides reachability.
#[cfg(windows)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}

/// Best-effort start time of `pid`.
///
/// On Linux this is the boot time plus the `starttime` tick count of
/// `/proc/<pid>/stat`. Other platforms report `None`.
#[must_use]
pub fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    #[cfg(target_os = "linux")]
    {
        use nix::unistd::{sysconf, SysconfVar};

        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let boot = std::fs::read_to_string("/proc/stat").ok()?;
        let ticks_per_second = sysconf(SysconfVar::CLK_TCK).ok().flatten()?;
        start_time_from_proc(&stat, &boot, u64::try_from(ticks_per_second).ok()?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

/// Combine `/proc/<pid>/stat` and `/proc/stat` contents into a start time.
#[cfg(any(target_os = "linux", test))]
fn start_time_from_proc(stat: &str, boot: &str, ticks_per_second: u64) -> Option<DateTime<Utc>> {
    if ticks_per_second == 0 {
        return None;
    }
    // `comm` may contain spaces and parentheses; fields resume after the last ')'.
    // The remainder starts at field 3, so `starttime` (field 22) is index 19.
    let start_ticks: u64 = stat
        .get(stat.rfind(')')? + 1..)?
        .split_whitespace()
        .nth(19)?
        .parse()
        .ok()?;
    let boot_seconds: i64 = boot
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;

    let seconds = i64::try_from(start_ticks / ticks_per_second).ok()?;
    let nanos = u32::try_from((start_ticks % ticks_per_second) * 1_000_000_000 / ticks_per_second).ok()?;
    DateTime::from_timestamp(boot_seconds.checked_add(seconds)?, nanos)
}
