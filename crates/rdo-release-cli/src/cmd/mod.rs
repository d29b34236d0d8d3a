pub mod new_releases;
pub mod pins;
pub mod reviews;
pub mod run;
pub mod status;

use anyhow::{bail, Context as _};
use clap::Args;
use rdo_release_core::{
    config::{Config, ConfigWarning, RunConfig, TarballPolicy, WarnLevel},
    deliverable::VersionFilter,
    distgit::ChangelogIdentity,
    paths,
    rdoinfo::{RdoInfo, RdoInfoCheckout},
    store::StatusStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Base directory plus the loaded configuration file.
pub struct Context {
    pub base: PathBuf,
    pub config: Config,
}

impl Context {
    /// Create the directory layout and read the configuration.
    pub fn load(base: PathBuf, config_path: Option<&Path>) -> anyhow::Result<Self> {
        paths::ensure_layout(&base)
            .with_context(|| format!("cannot create directories under {}", base.display()))?;
        let config = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                Config::load(path)
            }
            None => Config::load(&paths::config_path(&base)),
        }
        .context("failed to load configuration")?;
        Ok(Self { base, config })
    }

    pub fn open_store(&self) -> anyhow::Result<Arc<StatusStore>> {
        StatusStore::open(&paths::db_path(&self.base)).context("failed to open status store")
    }

    /// The rdoinfo checkout, refreshed from its remote unless `explicit` names
    /// a local directory to use as is.
    pub fn rdoinfo(&self, explicit: Option<&Path>) -> anyhow::Result<RdoInfoCheckout> {
        let info_file = self.config.rdoinfo.info_file.clone();
        if let Some(dir) = explicit {
            return Ok(RdoInfoCheckout::new(dir, info_file));
        }
        let dir = self
            .config
            .rdoinfo
            .dir
            .clone()
            .unwrap_or_else(|| paths::rdoinfo_dir(&self.base));
        let checkout = RdoInfoCheckout::new(dir, info_file);
        checkout
            .sync(&self.config.rdoinfo.url)
            .context("failed to update rdoinfo")?;
        Ok(checkout)
    }

    pub fn load_rdoinfo(&self, explicit: Option<&Path>) -> anyhow::Result<RdoInfo> {
        let checkout = self.rdoinfo(explicit)?;
        checkout
            .load_current()
            .with_context(|| format!("failed to read rdoinfo in {}", checkout.dir().display()))
    }
}

/// Flags shared by every command that processes packages.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// OpenStack release to work on (e.g. train)
    #[arg(long, short = 'r')]
    pub release: String,

    /// Run every check but submit nothing and record no status changes
    #[arg(long)]
    pub dry_run: bool,

    /// Gerrit user for the distgit review remote
    #[arg(long, short = 'u', env = "USER")]
    pub user: Option<String>,

    /// Name for the %changelog entry of the bump
    #[arg(long, requires = "changelog_email")]
    pub changelog_user: Option<String>,

    /// Email for the %changelog entry of the bump
    #[arg(long, requires = "changelog_user")]
    pub changelog_email: Option<String>,

    /// Only bump once upstream has a tag for the version
    #[arg(long)]
    pub require_tag: bool,

    /// What to do when the tarball is missing: poll or retry-later
    #[arg(long)]
    pub tarball_policy: Option<TarballPolicy>,

    /// Skip end-of-life and extended-maintenance versions
    #[arg(long)]
    pub skip_eol: bool,

    /// Stop the batch at the first failed package
    #[arg(long)]
    pub stop_on_failure: bool,
}

impl ProcessArgs {
    /// Flags override the configuration file.
    pub fn run_config(&self, config: &Config) -> anyhow::Result<RunConfig> {
        let mut rc = RunConfig::new(&self.release, self.user.clone().unwrap_or_default());
        rc.dry_run = self.dry_run;
        rc.require_tag = self.require_tag || config.require_tag;
        rc.stop_on_failure = self.stop_on_failure || config.stop_on_failure;
        rc.tarball = match &self.tarball_policy {
            Some(chosen) => chosen.clone().overriding(&config.tarball),
            None => config.tarball.clone(),
        };
        rc.changelog = match (&self.changelog_user, &self.changelog_email) {
            (Some(user), Some(email)) => Some(ChangelogIdentity {
                user: user.clone(),
                email: email.clone(),
            }),
            _ => config.changelog.clone(),
        };
        rc.version_filter = if self.skip_eol || config.skip_eol {
            config.version_filter()?
        } else {
            VersionFilter::default()
        };
        Ok(rc)
    }
}

/// Log configuration warnings; refuse to run on errors.
pub fn check_config(warnings: &[ConfigWarning]) -> anyhow::Result<()> {
    let mut errors = 0;
    for w in warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => {
                tracing::error!("{}", w.message);
                errors += 1;
            }
        }
    }
    if errors > 0 {
        bail!("invalid run configuration ({errors} errors)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ProcessArgs {
        ProcessArgs {
            release: "train".into(),
            dry_run: false,
            user: Some("rdobot".into()),
            changelog_user: None,
            changelog_email: None,
            require_tag: false,
            tarball_policy: None,
            skip_eol: false,
            stop_on_failure: false,
        }
    }

    #[test]
    fn flags_override_config() {
        let config = Config {
            tarball: TarballPolicy::RetryLater,
            require_tag: true,
            ..Config::default()
        };
        let mut a = args();
        let rc = a.run_config(&config).unwrap();
        assert_eq!(rc.tarball, TarballPolicy::RetryLater);
        assert!(rc.require_tag);
        assert!(!rc.version_filter.is_excluded("train-eol"));

        a.tarball_policy = Some(TarballPolicy::default());
        a.skip_eol = true;
        a.changelog_user = Some("RDO Bot".into());
        a.changelog_email = Some("bot@example.org".into());
        let rc = a.run_config(&config).unwrap();
        assert_eq!(rc.tarball, TarballPolicy::default());
        assert!(rc.version_filter.is_excluded("train-eol"));
        assert_eq!(rc.changelog.unwrap().email, "bot@example.org");
    }

    #[test]
    fn poll_flag_keeps_configured_polling() {
        let config = Config {
            tarball: TarballPolicy::Poll {
                max_attempts: 5,
                interval_secs: 60,
            },
            ..Config::default()
        };
        let mut a = args();
        a.tarball_policy = Some("poll".parse().unwrap());
        let rc = a.run_config(&config).unwrap();
        assert_eq!(rc.tarball.max_attempts(), 5);
        assert_eq!(rc.tarball.interval().as_secs(), 60);

        a.tarball_policy = Some("retry-later".parse().unwrap());
        assert_eq!(a.run_config(&config).unwrap().tarball, TarballPolicy::RetryLater);
    }

    #[test]
    fn config_errors_refuse_to_run() {
        let warn = ConfigWarning {
            level: WarnLevel::Warning,
            message: "w".into(),
        };
        assert!(check_config(std::slice::from_ref(&warn)).is_ok());
        let err = ConfigWarning {
            level: WarnLevel::Error,
            message: "e".into(),
        };
        assert!(check_config(&[warn, err]).is_err());
    }

    #[test]
    fn context_creates_layout_and_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = Context::load(dir.path().to_path_buf(), None).unwrap();
        assert!(paths::distgits_dir(&ctx.base).is_dir());
        assert_eq!(ctx.config.tarball, TarballPolicy::default());

        let missing = dir.path().join("nope.yaml");
        assert!(Context::load(dir.path().to_path_buf(), Some(&missing)).is_err());
    }
}
