use crate::deliverable::{VersionFilter, DEFAULT_RELEASES_RAW_URL};
use crate::distgit::ChangelogIdentity;
use crate::error::{ReleaseError, Result};
use crate::gerrit::DEFAULT_GERRIT_URL;
use crate::poller::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};
use crate::rdoinfo::{DEFAULT_INFO_FILE, DEFAULT_RDOINFO_URL};
use chrono::{Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// TarballPolicy
// ---------------------------------------------------------------------------

/// What to do when the upstream tarball is not downloadable yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TarballPolicy {
    /// Poll in-process, then fall back to RETRY.
    Poll {
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(default = "default_interval_secs")]
        interval_secs: u64,
    },
    /// Record RETRY on the first miss and let the next run pick it up.
    RetryLater,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

impl Default for TarballPolicy {
    fn default() -> Self {
        Self::Poll {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl TarballPolicy {
    pub fn interval(&self) -> Duration {
        match self {
            Self::Poll { interval_secs, .. } => Duration::from_secs(*interval_secs),
            Self::RetryLater => Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Poll { max_attempts, .. } => *max_attempts,
            Self::RetryLater => 1,
        }
    }

    /// A policy picked by name on the command line, keeping the polling
    /// parameters of `configured` when both are `Poll`.
    pub fn overriding(self, configured: &TarballPolicy) -> TarballPolicy {
        match (self, configured) {
            (Self::Poll { .. }, Self::Poll { .. }) => configured.clone(),
            (chosen, _) => chosen,
        }
    }
}

impl std::str::FromStr for TarballPolicy {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "poll" => Ok(Self::default()),
            "retry-later" | "retry_later" => Ok(Self::RetryLater),
            other => Err(ReleaseError::InvalidConfig(format!(
                "unknown tarball policy '{other}' (expected poll or retry-later)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (rdo-release.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdoInfoConfig {
    #[serde(default = "default_rdoinfo_url")]
    pub url: String,
    /// Checkout location; `<base>/data/rdoinfo` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_info_file")]
    pub info_file: String,
}

fn default_rdoinfo_url() -> String {
    DEFAULT_RDOINFO_URL.to_string()
}

fn default_info_file() -> String {
    DEFAULT_INFO_FILE.to_string()
}

impl Default for RdoInfoConfig {
    fn default() -> Self {
        Self {
            url: default_rdoinfo_url(),
            dir: None,
            info_file: default_info_file(),
        }
    }
}

/// Settings from `rdo-release.yaml`. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_gerrit_url")]
    pub gerrit_url: String,
    #[serde(default = "default_releases_url")]
    pub releases_url: String,
    #[serde(default)]
    pub rdoinfo: RdoInfoConfig,
    #[serde(default)]
    pub tarball: TarballPolicy,
    #[serde(default = "default_excluded_versions")]
    pub excluded_versions: Vec<String>,
    #[serde(default)]
    pub skip_eol: bool,
    #[serde(default)]
    pub require_tag: bool,
    #[serde(default)]
    pub stop_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<ChangelogIdentity>,
}

fn default_gerrit_url() -> String {
    DEFAULT_GERRIT_URL.to_string()
}

fn default_releases_url() -> String {
    DEFAULT_RELEASES_RAW_URL.to_string()
}

fn default_excluded_versions() -> Vec<String> {
    vec!["-eol$".to_string(), "-em$".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gerrit_url: default_gerrit_url(),
            releases_url: default_releases_url(),
            rdoinfo: RdoInfoConfig::default(),
            tarball: TarballPolicy::default(),
            excluded_versions: default_excluded_versions(),
            skip_eol: false,
            require_tag: false,
            stop_on_failure: false,
            changelog: None,
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn version_filter(&self) -> Result<VersionFilter> {
        let patterns = self
            .excluded_versions
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ReleaseError::InvalidConfig(format!("excluded_versions '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(VersionFilter::new(patterns))
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Everything one run needs, fixed before processing starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub release: String,
    pub days: u32,
    pub review_number: Option<u64>,
    pub dry_run: bool,
    /// Gerrit user for the distgit review remote.
    pub user: String,
    pub changelog: Option<ChangelogIdentity>,
    pub require_tag: bool,
    pub tarball: TarballPolicy,
    pub version_filter: VersionFilter,
    pub stop_on_failure: bool,
}

impl RunConfig {
    pub fn new(release: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            days: 1,
            review_number: None,
            dry_run: false,
            user: user.into(),
            changelog: None,
            require_tag: false,
            tarball: TarballPolicy::default(),
            version_filter: VersionFilter::default(),
            stop_on_failure: false,
        }
    }

    /// Start of the review window, or `None` when a single review is
    /// requested.
    pub fn since(&self, today: NaiveDate) -> Option<NaiveDate> {
        if self.review_number.is_some() {
            return None;
        }
        today.checked_sub_days(Days::new(u64::from(self.days)))
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.release.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "release must not be empty".to_string(),
            });
        }

        if self.user.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "no distgit user: pass --user or set USER".to_string(),
            });
        }

        if self.days == 0 && self.review_number.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "days=0 only looks at reviews merged today".to_string(),
            });
        }

        if let TarballPolicy::Poll {
            max_attempts,
            interval_secs,
        } = &self.tarball
        {
            if *max_attempts == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "tarball.max_attempts=0 never checks; every bump becomes RETRY"
                        .to_string(),
                });
            }
            if *interval_secs == 0 && *max_attempts > 1 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "tarball.interval_secs=0 polls without waiting".to_string(),
                });
            }
        }

        if let Some(id) = &self.changelog {
            if !id.email.contains('@') {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("changelog email '{}' does not look like an address", id.email),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(&dir.path().join("rdo-release.yaml")).unwrap();
        assert_eq!(cfg.gerrit_url, DEFAULT_GERRIT_URL);
        assert_eq!(cfg.tarball, TarballPolicy::default());
        assert_eq!(cfg.rdoinfo.info_file, "rdo.yml");
        assert!(!cfg.skip_eol);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rdo-release.yaml");
        std::fs::write(
            &path,
            "gerrit_url: https://gerrit.example.org\ntarball:\n  policy: poll\n  max_attempts: 5\nchangelog:\n  user: RDO Bot\n  email: bot@example.org\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.gerrit_url, "https://gerrit.example.org");
        assert_eq!(cfg.releases_url, DEFAULT_RELEASES_RAW_URL);
        assert_eq!(
            cfg.tarball,
            TarballPolicy::Poll {
                max_attempts: 5,
                interval_secs: 30
            }
        );
        assert_eq!(cfg.changelog.unwrap().user, "RDO Bot");
    }

    #[test]
    fn retry_later_policy_parses() {
        let cfg: Config = serde_yaml::from_str("tarball:\n  policy: retry_later\n").unwrap();
        assert_eq!(cfg.tarball, TarballPolicy::RetryLater);
        assert_eq!("retry-later".parse::<TarballPolicy>().unwrap(), TarballPolicy::RetryLater);
        assert!("sometimes".parse::<TarballPolicy>().is_err());
    }

    #[test]
    fn named_poll_policy_keeps_configured_parameters() {
        let configured = TarballPolicy::Poll {
            max_attempts: 3,
            interval_secs: 10,
        };
        let chosen: TarballPolicy = "poll".parse().unwrap();
        assert_eq!(chosen.overriding(&configured), configured);
        assert_eq!(
            TarballPolicy::RetryLater.overriding(&configured),
            TarballPolicy::RetryLater
        );
        assert_eq!(
            TarballPolicy::default().overriding(&TarballPolicy::RetryLater),
            TarballPolicy::default()
        );
    }

    #[test]
    fn version_filter_compiles_patterns() {
        let cfg = Config::default();
        let filter = cfg.version_filter().unwrap();
        assert!(filter.is_excluded("train-eol"));
        assert!(filter.is_excluded("stein-em"));
        assert!(!filter.is_excluded("1.2.3"));

        let bad = Config {
            excluded_versions: vec!["(".into()],
            ..Config::default()
        };
        assert!(matches!(bad.version_filter(), Err(ReleaseError::InvalidConfig(_))));
    }

    #[test]
    fn since_uses_days_unless_review_given() {
        let today = NaiveDate::from_ymd_opt(2019, 10, 3).unwrap();
        let mut cfg = RunConfig::new("train", "rdobot");
        cfg.days = 2;
        assert_eq!(cfg.since(today), NaiveDate::from_ymd_opt(2019, 10, 1));
        cfg.review_number = Some(1001);
        assert_eq!(cfg.since(today), None);
    }

    #[test]
    fn validate_flags_bad_values() {
        let ok = RunConfig::new("train", "rdobot");
        assert!(ok.validate().is_empty());

        let mut bad = RunConfig::new("", "");
        bad.tarball = TarballPolicy::Poll {
            max_attempts: 0,
            interval_secs: 30,
        };
        let warnings = bad.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 2);
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("max_attempts=0")));
    }
}
