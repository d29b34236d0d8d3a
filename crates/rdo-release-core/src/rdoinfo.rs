//! The rdoinfo package registry.
//!
//! `rdo.yml` lists every RDO package with its upstream repository and a
//! `tags` map keyed by release. A release tag may carry a `source-branch`,
//! which pins the package to that upstream version for the release.
//!
//! ```yaml
//! package-configs:
//!   rpmfactory-lib:
//!     name: python-%(project)s
//!     upstream: git://git.openstack.org/openstack/%(project)s
//! packages:
//! - project: oslo-config
//!   conf: rpmfactory-lib
//!   upstream: git://git.openstack.org/openstack/oslo.config
//!   tags:
//!     train:
//!     ussuri:
//!       source-branch: 6.11.1
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::error::{ReleaseError, Result};

pub const DEFAULT_RDOINFO_URL: &str = "https://github.com/redhat-openstack/rdoinfo";
pub const DEFAULT_INFO_FILE: &str = "rdo.yml";

/// Prefix rdoinfo uses for upstream URLs of OpenStack projects.
const OPENSTACK_GIT_PREFIX: &str = "git://git.openstack.org/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub project: Option<String>,
    pub upstream: Option<String>,
    /// Release name to the pinned upstream version, if any.
    pub tags: BTreeMap<String, Option<String>>,
}

/// Result of a pin lookup for one (package, release).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinLookup {
    /// Pinned to this upstream version.
    Pinned(String),
    /// Part of the release and free to follow upstream.
    Unpinned,
    /// Unknown to the registry.
    NotInRegistry,
    /// Known, but not shipped in this release.
    NotInRelease,
}

/// A `source-branch` that changed between two registry revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChange {
    pub name: String,
    pub release: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Maps upstream repositories to distribution package names.
pub trait PackageIndex {
    fn package_for_repo(&self, repo: &str) -> Option<String>;
}

/// Per-release version pins.
pub trait PinRegistry {
    fn pin(&self, package: &str, release: &str) -> Result<PinLookup>;
}

// ---------------------------------------------------------------------------
// RdoInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RdoInfo {
    packages: Vec<PackageInfo>,
}

impl RdoInfo {
    pub fn parse(content: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(content)?;
        let configs = doc
            .get("package-configs")
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();
        let entries = doc
            .get("packages")
            .and_then(Value::as_sequence)
            .ok_or_else(|| ReleaseError::InvalidConfig("rdoinfo has no packages list".into()))?;

        let packages = entries
            .iter()
            .filter_map(|entry| resolve_package(entry, &configs))
            .collect();
        Ok(Self { packages })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn packages(&self) -> &[PackageInfo] {
        &self.packages
    }

    pub fn get(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Find the package built from `repo` (`openstack/oslo.config`).
    ///
    /// Tries, in order: the package name or upstream URL as given, the
    /// upstream with the OpenStack git prefix, any upstream ending in
    /// `/<repo>`.
    pub fn find_package(&self, repo: &str) -> Option<&PackageInfo> {
        let strict = self
            .packages
            .iter()
            .find(|p| p.name == repo || p.upstream.as_deref() == Some(repo));
        let prefixed = format!("{OPENSTACK_GIT_PREFIX}{repo}");
        let suffix = format!("/{repo}");
        strict
            .or_else(|| {
                self.packages
                    .iter()
                    .find(|p| p.upstream.as_deref() == Some(prefixed.as_str()))
            })
            .or_else(|| {
                self.packages.iter().find(|p| {
                    p.upstream
                        .as_deref()
                        .is_some_and(|u| u.trim_end_matches(".git").ends_with(&suffix))
                })
            })
    }

    pub fn lookup_pin(&self, package: &str, release: &str) -> PinLookup {
        let Some(info) = self.get(package) else {
            return PinLookup::NotInRegistry;
        };
        match info.tags.get(release) {
            None => PinLookup::NotInRelease,
            Some(Some(version)) => PinLookup::Pinned(version.clone()),
            Some(None) => PinLookup::Unpinned,
        }
    }
}

impl PackageIndex for RdoInfo {
    fn package_for_repo(&self, repo: &str) -> Option<String> {
        self.find_package(repo).map(|p| p.name.clone())
    }
}

impl PinRegistry for RdoInfo {
    fn pin(&self, package: &str, release: &str) -> Result<PinLookup> {
        Ok(self.lookup_pin(package, release))
    }
}

/// Merge `conf` defaults into a package entry and expand `%(key)s`.
fn resolve_package(entry: &Value, configs: &Mapping) -> Option<PackageInfo> {
    let mut fields = entry.as_mapping()?.clone();
    let conf = fields.get("conf").and_then(Value::as_str).map(str::to_string);
    if let Some(conf) = conf {
        if let Some(defaults) = configs.get(conf.as_str()).and_then(Value::as_mapping) {
            for (k, v) in defaults {
                if !fields.contains_key(k) {
                    fields.insert(k.clone(), v.clone());
                }
            }
        }
    }

    let project = fields.get("project").and_then(Value::as_str).map(str::to_string);
    let expand = |raw: &str| match &project {
        Some(p) => raw.replace("%(project)s", p),
        None => raw.to_string(),
    };
    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .map(expand)
        .or_else(|| project.clone())?;
    let upstream = fields
        .get("upstream")
        .and_then(Value::as_str)
        .map(|u| expand(u).replace("%(name)s", &name));

    let tags = fields
        .get("tags")
        .and_then(Value::as_mapping)
        .map(|tags| {
            tags.iter()
                .filter_map(|(release, tag)| {
                    let release = release.as_str()?.to_string();
                    let pin = tag
                        .get("source-branch")
                        .and_then(|v| match v {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        });
                    Some((release, pin))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PackageInfo {
        name,
        project,
        upstream,
        tags,
    })
}

/// Pins for `release` that `new` sets or moves relative to `old`.
///
/// Packages absent from `old`, or not yet part of `release` there, are
/// ignored: they only become pin-driven work once they have shipped.
pub fn pin_changes(old: &RdoInfo, new: &RdoInfo, release: &str) -> Vec<PinChange> {
    let mut changes = Vec::new();
    for pkg in new.packages() {
        let Some(before) = old.get(&pkg.name) else {
            continue;
        };
        if before.tags == pkg.tags {
            continue;
        }
        if !before.tags.contains_key(release) {
            debug!("{}: not in {release} before, skipping", pkg.name);
            continue;
        }
        let Some(Some(version)) = pkg.tags.get(release) else {
            continue;
        };
        if before.tags.get(release) == Some(&Some(version.clone())) {
            continue;
        }
        changes.push(PinChange {
            name: pkg.name.clone(),
            release: release.to_string(),
            version: version.clone(),
        });
    }
    changes
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// A local git checkout of the registry.
#[derive(Debug, Clone)]
pub struct RdoInfoCheckout {
    dir: PathBuf,
    info_file: String,
}

impl RdoInfoCheckout {
    pub fn new(dir: impl Into<PathBuf>, info_file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            info_file: info_file.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clone `url` if the checkout is missing, otherwise fast-forward it.
    pub fn sync(&self, url: &str) -> Result<()> {
        if self.dir.join(".git").is_dir() {
            info!("updating rdoinfo in {}", self.dir.display());
            git(&self.dir, &["pull", "--ff-only", "--quiet"])?;
        } else {
            info!("cloning rdoinfo from {url}");
            let parent = self.dir.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(parent)?;
            let target = self.dir.to_string_lossy().into_owned();
            git(parent, &["clone", "--quiet", url, &target])?;
        }
        Ok(())
    }

    /// Registry as checked out in the working tree.
    pub fn load_current(&self) -> Result<RdoInfo> {
        RdoInfo::load(&self.dir.join(&self.info_file))
    }

    /// Registry as of `rev` (`HEAD~`).
    pub fn load_revision(&self, rev: &str) -> Result<RdoInfo> {
        let spec = format!("{rev}:{}", self.info_file);
        RdoInfo::parse(&git(&self.dir, &["show", &spec])?)
    }
}

fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| ReleaseError::tool("git", e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReleaseError::tool(
            "git",
            format!("git {} failed: {}", args.join(" "), stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
