//! Packaging work on distgit checkouts.
//!
//! Every attempt starts from a fresh clone under the distgits directory and
//! works on the `<release>-rdo` branch. The real tools (`git`, `rdopkg`,
//! `rpmspec`, `spectool`) sit behind `PackagingTool` so the reconciler can be
//! driven by fakes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ReleaseError, Result};
use crate::evr::Evr;

/// Message `rdopkg new-version` prints when there is nothing to bump.
const ALREADY_AT_VERSION: &str = "package is already at version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCheckout {
    Branched,
    /// The release branch does not exist yet in the distgit.
    NotBranched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpMode {
    /// Rewrite the spec file locally without committing.
    DryRun,
    /// Commit the bump on top of the release patches branch.
    Commit,
}

/// Author recorded in the `%changelog` entry of a bump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogIdentity {
    pub user: String,
    pub email: String,
}

pub fn stable_branch(release: &str) -> String {
    format!("{release}-rdo")
}

pub fn patches_branch(release: &str) -> String {
    format!("review-patches/{release}-rdo-patches")
}

pub fn review_topic(release: &str) -> String {
    format!("{release}-update")
}

// ---------------------------------------------------------------------------
// PackagingTool
// ---------------------------------------------------------------------------

pub trait PackagingTool {
    /// Replace any previous checkout of `package` with a fresh clone.
    fn prepare(&self, package: &str) -> Result<()>;

    fn checkout_stable(&self, package: &str, release: &str) -> Result<BranchCheckout>;

    /// Whether upstream carries a `version` tag.
    fn tag_exists(&self, package: &str, version: &str) -> Result<bool>;

    /// Epoch, version and release of the checked-out spec.
    fn evr(&self, package: &str) -> Result<Evr>;

    fn new_version(
        &self,
        package: &str,
        version: &str,
        release: &str,
        mode: BumpMode,
    ) -> Result<()>;

    /// Whether the sources referenced by the spec file can be downloaded.
    fn tarball_exists(&self, package: &str) -> Result<bool>;

    fn submit_review(&self, package: &str, release: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// RdopkgTool
// ---------------------------------------------------------------------------

pub struct RdopkgTool {
    distgits: PathBuf,
    user: String,
    changelog: Option<ChangelogIdentity>,
    git: PathBuf,
    rdopkg: PathBuf,
    rpmspec: PathBuf,
    spectool: PathBuf,
}

fn find_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| ReleaseError::ToolNotFound(name.to_string()))
}

impl RdopkgTool {
    /// Resolve every required binary up front.
    pub fn new(
        distgits: impl Into<PathBuf>,
        user: impl Into<String>,
        changelog: Option<ChangelogIdentity>,
    ) -> Result<Self> {
        find_tool("git-review")?;
        Ok(Self {
            distgits: distgits.into(),
            user: user.into(),
            changelog,
            git: find_tool("git")?,
            rdopkg: find_tool("rdopkg")?,
            rpmspec: find_tool("rpmspec")?,
            spectool: find_tool("spectool")?,
        })
    }

    fn checkout(&self, package: &str) -> PathBuf {
        self.distgits.join(package)
    }

    fn spec_file(package: &str) -> String {
        format!("{package}.spec")
    }

    /// Run and return the raw output, whatever the exit status.
    fn exec(&self, bin: &Path, args: &[String], cwd: &Path) -> Result<Output> {
        let name = bin
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("{} {} (in {})", name, args.join(" "), cwd.display());
        Command::new(bin)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| ReleaseError::tool(name, e.to_string()))
    }

    /// Run and fail on a non-zero exit, with stderr as the message.
    fn run(&self, bin: &Path, args: &[String], cwd: &Path) -> Result<Output> {
        let output = self.exec(bin, args, cwd)?;
        if !output.status.success() {
            let name = bin
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReleaseError::tool(
                name,
                format!("{} exited with {}: {}", args.join(" "), output.status, stderr.trim()),
            ));
        }
        Ok(output)
    }
}

/// Read the exit code of `git show-ref --verify --quiet`: 0 means the ref
/// exists, 1 means it does not. Anything else is a broken checkout.
fn remote_branch_exists(code: Option<i32>, stderr: &str) -> Result<bool> {
    match code {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        Some(code) => Err(ReleaseError::tool(
            "git",
            format!("show-ref exited with {code}: {}", stderr.trim()),
        )),
        None => Err(ReleaseError::tool("git", "show-ref killed by a signal")),
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl PackagingTool for RdopkgTool {
    fn prepare(&self, package: &str) -> Result<()> {
        std::fs::create_dir_all(&self.distgits)?;
        let dir = self.checkout(package);
        if dir.exists() {
            debug!("removing previous checkout {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        }
        self.run(
            &self.rdopkg,
            &owned(&["clone", package, "-u", &self.user]),
            &self.distgits,
        )?;
        Ok(())
    }

    fn checkout_stable(&self, package: &str, release: &str) -> Result<BranchCheckout> {
        let dir = self.checkout(package);
        let branch = stable_branch(release);
        let remote_ref = format!("refs/remotes/origin/{branch}");
        let probe = self.exec(
            &self.git,
            &owned(&["show-ref", "--verify", "--quiet", &remote_ref]),
            &dir,
        )?;
        let stderr = String::from_utf8_lossy(&probe.stderr);
        if !remote_branch_exists(probe.status.code(), &stderr)? {
            return Ok(BranchCheckout::NotBranched);
        }
        let upstream = format!("origin/{branch}");
        self.run(
            &self.git,
            &owned(&["checkout", "-B", &branch, &upstream]),
            &dir,
        )?;
        Ok(BranchCheckout::Branched)
    }

    fn tag_exists(&self, package: &str, version: &str) -> Result<bool> {
        let tag = format!("refs/tags/{version}");
        let output = self.run(
            &self.git,
            &owned(&["ls-remote", "--tags", "upstream", &tag]),
            &self.checkout(package),
        )?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn evr(&self, package: &str) -> Result<Evr> {
        let output = self.run(
            &self.rpmspec,
            &owned(&[
                "-q",
                "--srpm",
                "--qf",
                "%{epoch} %{version} %{release}\n",
                &Self::spec_file(package),
            ]),
            &self.checkout(package),
        )?;
        parse_evr_line(&String::from_utf8_lossy(&output.stdout))
    }

    fn new_version(
        &self,
        package: &str,
        version: &str,
        release: &str,
        mode: BumpMode,
    ) -> Result<()> {
        let dir = self.checkout(package);
        let upstream = format!("origin/{}", stable_branch(release));
        self.run(&self.git, &owned(&["reset", "--hard", &upstream]), &dir)?;

        let args = new_version_args(version, release, mode, self.changelog.as_ref());
        let output = self.exec(&self.rdopkg, &args, &dir)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(msg) = already_at_version(&stderr) {
            info!("{package}: {msg}");
            return Ok(());
        }
        if !output.status.success() {
            return Err(ReleaseError::tool(
                "rdopkg",
                format!("new-version {version} failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }

    fn tarball_exists(&self, package: &str) -> Result<bool> {
        let output = self.exec(
            &self.spectool,
            &owned(&["-g", &Self::spec_file(package)]),
            &self.checkout(package),
        )?;
        Ok(output.status.success())
    }

    fn submit_review(&self, package: &str, release: &str) -> Result<()> {
        self.run(
            &self.git,
            &owned(&["review", "-t", &review_topic(release)]),
            &self.checkout(package),
        )?;
        Ok(())
    }
}

/// Arguments for `rdopkg new-version`.
pub fn new_version_args(
    version: &str,
    release: &str,
    mode: BumpMode,
    changelog: Option<&ChangelogIdentity>,
) -> Vec<String> {
    let mut args = owned(&["new-version", "-b", "-U", version]);
    match mode {
        BumpMode::DryRun => args.push("-t".into()),
        BumpMode::Commit => {
            args.push("-p".into());
            args.push(patches_branch(release));
            if let Some(id) = changelog {
                args.extend([
                    "--changelog-user".to_string(),
                    id.user.clone(),
                    "--changelog-email".to_string(),
                    id.email.clone(),
                ]);
            }
        }
    }
    args
}

/// Parse `<epoch> <version> <release>` as printed by the `rpmspec` query.
pub fn parse_evr_line(stdout: &str) -> Result<Evr> {
    let line = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [epoch, version, release] => Evr::from_parts(epoch, version, release),
        _ => Err(ReleaseError::InvalidEvr(line.to_string())),
    }
}

fn already_at_version(stderr: &str) -> Option<&str> {
    let start = stderr.find(ALREADY_AT_VERSION)?;
    let rest = &stderr[start..];
    Some(rest.lines().next().unwrap_or(rest).trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
