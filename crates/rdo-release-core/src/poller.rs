//! Bounded polling for artifacts produced by an external pipeline.
//!
//! The upstream tarball for a new version is built asynchronously after the
//! release review merges, so it may not exist yet when we first look.
//! `wait_for_artifact` blocks the calling thread between attempts; the only
//! way to cancel it is to terminate the process.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Something that can tell whether an artifact exists right now.
pub trait ArtifactCheck {
    fn exists(&self) -> Result<bool>;
}

impl<F> ArtifactCheck for F
where
    F: Fn() -> Result<bool>,
{
    fn exists(&self) -> Result<bool> {
        self()
    }
}

/// Blocking sleep between attempts. Swapped out in tests.
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll `check` up to `max_attempts` times, `interval` apart.
///
/// Returns `true` on the first attempt that finds the artifact and `false`
/// once attempts run out. Errors from `check` count as "not ready yet".
pub fn wait_for_artifact(
    check: &dyn ArtifactCheck,
    max_attempts: u32,
    interval: Duration,
    sleeper: &dyn Sleep,
) -> bool {
    for attempt in 1..=max_attempts {
        match check.exists() {
            Ok(true) => {
                debug!("artifact available on attempt {attempt}/{max_attempts}");
                return true;
            }
            Ok(false) => {
                debug!("artifact not available, attempt {attempt}/{max_attempts}");
            }
            Err(e) => {
                warn!("artifact check failed on attempt {attempt}/{max_attempts}: {e}");
            }
        }
        if attempt < max_attempts {
            sleeper.sleep(interval);
        }
    }
    false
}
