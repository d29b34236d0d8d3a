//! Single-run lock.
//!
//! Only one run may process a given base directory at a time. The lock is a
//! JSON file holding the owner's pid. It is written to a private temp file
//! first and published with `hard_link`, which fails if the lock exists, so
//! other runners never observe a half-written lock.
//!
//! A lock whose pid is no longer alive is taken over. Takeover renames the
//! file aside and checks it is still the holder that was judged stale; a
//! lock published by someone else in between is put back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReleaseError, Result};

/// An unparseable lock younger than this is assumed to be held.
pub const UNREADABLE_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

/// What sits at the lock path right now.
#[derive(Debug)]
enum Holder {
    Missing,
    Unreadable { age: Duration },
    Held(LockInfo),
}

/// Held for the duration of a run; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    pub fn acquire(path: &Path, release: Option<&str>) -> Result<Self> {
        Self::acquire_with(path, release, is_pid_alive, UNREADABLE_GRACE)
    }

    fn acquire_with(
        path: &Path,
        release: Option<&str>,
        alive: impl Fn(u32) -> bool,
        grace: Duration,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            release: release.map(str::to_string),
        };

        let staged = sibling(path, &format!("{}.tmp", info.pid));
        fs::write(&staged, serde_json::to_string(&info)?)?;
        let published = publish(path, &staged, &alive, grace);
        if let Err(e) = fs::remove_file(&staged) {
            debug!("failed to remove {}: {e}", staged.display());
        }
        published?;

        debug!("acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match read_holder(&self.path) {
            Holder::Held(ref h) if *h == self.info => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("failed to remove run lock {}: {e}", self.path.display());
                }
            }
            Holder::Missing => {}
            _ => warn!(
                "run lock {} no longer belongs to this run, leaving it",
                self.path.display()
            ),
        }
    }
}

fn publish(
    path: &Path,
    staged: &Path,
    alive: &impl Fn(u32) -> bool,
    grace: Duration,
) -> Result<()> {
    let already_running = |pid: u32| ReleaseError::AlreadyRunning {
        path: path.display().to_string(),
        pid,
    };

    // Retries follow removal of a stale lock or a holder vanishing under us.
    for _ in 0..3 {
        match fs::hard_link(staged, path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        match read_holder(path) {
            Holder::Missing => continue,
            Holder::Held(h) if alive(h.pid) => return Err(already_running(h.pid)),
            Holder::Held(h) => {
                warn!("removing stale run lock {} (pid {})", path.display(), h.pid);
                if !take_over(path, Some(&h))? {
                    return Err(already_running(current_pid(path)));
                }
            }
            Holder::Unreadable { age } if age < grace => return Err(already_running(0)),
            Holder::Unreadable { .. } => {
                warn!("removing unreadable run lock {}", path.display());
                if !take_over(path, None)? {
                    return Err(already_running(current_pid(path)));
                }
            }
        }
    }
    Err(already_running(current_pid(path)))
}

/// Move the lock aside if it is still `observed` (`None` for an unreadable
/// lock). Returns false, with the lock restored, if it changed hands.
fn take_over(path: &Path, observed: Option<&LockInfo>) -> Result<bool> {
    let aside = sibling(path, &format!("stale.{}", std::process::id()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }
    let moved = match read_holder(&aside) {
        Holder::Held(h) => Some(h),
        _ => None,
    };
    let unchanged = moved.as_ref() == observed;
    if !unchanged {
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    fs::remove_file(&aside)?;
    Ok(unchanged)
}

fn read_holder(path: &Path) -> Holder {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Holder::Missing,
        Err(_) => return Holder::Unreadable { age: lock_age(path) },
    };
    match serde_json::from_str(&raw) {
        Ok(info) => Holder::Held(info),
        Err(_) => Holder::Unreadable { age: lock_age(path) },
    }
}

fn lock_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .unwrap_or(Duration::ZERO)
}

fn current_pid(path: &Path) -> u32 {
    match read_holder(path) {
        Holder::Held(h) => h.pid,
        _ => 0,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Check whether a process is alive (`kill -0`).
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
