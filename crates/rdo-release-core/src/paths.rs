use crate::error::Result;
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Layout under the base directory
// ---------------------------------------------------------------------------

pub const DATA_DIR: &str = "data";
pub const LOGS_DIR: &str = "logs";
pub const DISTGITS_DIR: &str = "data/distgits";
pub const RDOINFO_DIR: &str = "data/rdoinfo";

pub const DB_FILE: &str = "data/reviews.sqlite";
pub const LOCK_FILE: &str = "data/rdo-release.lock";
pub const CONFIG_FILE: &str = "rdo-release.yaml";

pub const LOG_SUFFIX: &str = "rdo-auto-release.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn data_dir(base: &Path) -> PathBuf {
    base.join(DATA_DIR)
}

pub fn logs_dir(base: &Path) -> PathBuf {
    base.join(LOGS_DIR)
}

pub fn distgits_dir(base: &Path) -> PathBuf {
    base.join(DISTGITS_DIR)
}

pub fn rdoinfo_dir(base: &Path) -> PathBuf {
    base.join(RDOINFO_DIR)
}

pub fn db_path(base: &Path) -> PathBuf {
    base.join(DB_FILE)
}

pub fn lock_path(base: &Path) -> PathBuf {
    base.join(LOCK_FILE)
}

pub fn config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE)
}

/// `logs/<YYYYmmddHHMMSS>-rdo-auto-release.log`
/// Per-run log file, named after the wall-clock start time in `started`'s
/// own zone (the CLI passes local time, matching the log lines).
pub fn log_file<Tz: TimeZone>(base: &Path, started: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: Display,
{
    logs_dir(base).join(format!("{}-{LOG_SUFFIX}", started.format("%Y%m%d%H%M%S")))
}

/// Create the data, logs and distgits directories.
pub fn ensure_layout(base: &Path) -> Result<()> {
    for dir in [data_dir(base), logs_dir(base), distgits_dir(base)] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    #[test]
    fn layout_paths() {
        let base = Path::new("/srv/release");
        assert_eq!(db_path(base), PathBuf::from("/srv/release/data/reviews.sqlite"));
        assert_eq!(distgits_dir(base), PathBuf::from("/srv/release/data/distgits"));
        assert_eq!(config_path(base), PathBuf::from("/srv/release/rdo-release.yaml"));
    }

    #[test]
    fn log_file_is_timestamped() {
        let started = Utc.with_ymd_and_hms(2019, 10, 1, 8, 5, 9).unwrap();
        assert_eq!(
            log_file(Path::new("/b"), &started),
            PathBuf::from("/b/logs/20191001080509-rdo-auto-release.log")
        );
    }

    #[test]
    fn log_file_keeps_the_callers_zone() {
        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        let started = cest.with_ymd_and_hms(2019, 10, 1, 10, 5, 9).unwrap();
        assert_eq!(
            log_file(Path::new("/b"), &started),
            PathBuf::from("/b/logs/20191001100509-rdo-auto-release.log")
        );
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        ensure_layout(dir.path()).unwrap();
        ensure_layout(dir.path()).unwrap();
        assert!(distgits_dir(dir.path()).is_dir());
        assert!(logs_dir(dir.path()).is_dir());
    }
}
