//! In-memory collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::NaiveDate;

use crate::deliverable::DeliverableSource;
use crate::distgit::{BranchCheckout, BumpMode, PackagingTool};
use crate::error::{ReleaseError, Result};
use crate::evr::Evr;
use crate::gerrit::{ChangeInfo, CommitInfo, FileInfo, ParentInfo, RevisionInfo, ReviewSource};
use crate::poller::Sleep;
use crate::rdoinfo::{PackageIndex, PinLookup, PinRegistry};

// ---------------------------------------------------------------------------
// Reviews and deliverables
// ---------------------------------------------------------------------------

/// A merged review whose current revision is `head-<n>` with parent
/// `parent-<n>`, touching `paths`.
pub fn change(number: u64, submitted: &str, paths: &[&str]) -> ChangeInfo {
    let files = paths
        .iter()
        .map(|p| (p.to_string(), FileInfo::default()))
        .collect();
    let head = format!("head-{number}");
    let revision = RevisionInfo {
        commit: Some(CommitInfo {
            parents: vec![ParentInfo {
                commit: format!("parent-{number}"),
            }],
        }),
        files,
    };
    ChangeInfo {
        number,
        project: Some("openstack/releases".into()),
        subject: None,
        submitted: Some(submitted.to_string()),
        current_revision: Some(head.clone()),
        revisions: HashMap::from([(head, revision)]),
    }
}

/// Deliverable YAML with a single release of `repo`.
pub fn deliverable(team: &str, version: &str, repo: &str) -> String {
    format!("team: {team}\nreleases:\n  - version: {version}\n    projects:\n      - repo: {repo}\n")
}

#[derive(Default)]
pub struct FakeReviews {
    pub changes: Vec<ChangeInfo>,
    pub fail: bool,
    pub queries: RefCell<Vec<(String, Option<NaiveDate>, Option<u64>)>>,
}

impl FakeReviews {
    pub fn new(changes: Vec<ChangeInfo>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }
}

impl ReviewSource for FakeReviews {
    fn merged_release_reviews(
        &self,
        release: &str,
        after: Option<NaiveDate>,
        number: Option<u64>,
    ) -> Result<Vec<ChangeInfo>> {
        self.queries
            .borrow_mut()
            .push((release.to_string(), after, number));
        if self.fail {
            return Err(ReleaseError::Gerrit("503 Service Unavailable".into()));
        }
        Ok(self
            .changes
            .iter()
            .filter(|c| number.map_or(true, |n| c.number == n))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeDeliverables {
    files: HashMap<(String, String), String>,
    pub fail: bool,
}

impl FakeDeliverables {
    pub fn with(mut self, commit: &str, path: &str, content: &str) -> Self {
        self.files
            .insert((commit.to_string(), path.to_string()), content.to_string());
        self
    }
}

impl DeliverableSource for FakeDeliverables {
    fn fetch(&self, commit: &str, path: &str) -> Result<Option<String>> {
        if self.fail {
            return Err(ReleaseError::tool("http", "connection refused"));
        }
        Ok(self
            .files
            .get(&(commit.to_string(), path.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Repo-to-package map plus pins. Unlisted pins are `Unpinned`.
#[derive(Default)]
pub struct FakeRegistry {
    repos: HashMap<String, String>,
    pins: HashMap<(String, String), PinLookup>,
}

impl FakeRegistry {
    pub fn with_package(mut self, repo: &str, name: &str) -> Self {
        self.repos.insert(repo.to_string(), name.to_string());
        self
    }

    pub fn with_pin(mut self, name: &str, release: &str, pin: PinLookup) -> Self {
        self.pins
            .insert((name.to_string(), release.to_string()), pin);
        self
    }
}

impl PackageIndex for FakeRegistry {
    fn package_for_repo(&self, repo: &str) -> Option<String> {
        self.repos.get(repo).cloned()
    }
}

impl PinRegistry for FakeRegistry {
    fn pin(&self, package: &str, release: &str) -> Result<PinLookup> {
        Ok(self
            .pins
            .get(&(package.to_string(), release.to_string()))
            .cloned()
            .unwrap_or(PinLookup::Unpinned))
    }
}

// ---------------------------------------------------------------------------
// Packaging tool
// ---------------------------------------------------------------------------

/// Behaviour of one distgit in `FakeTool`.
#[derive(Debug, Clone)]
pub struct FakeDistgit {
    pub branched: bool,
    pub tagged: bool,
    pub evr: Evr,
    /// EVR the spec file reports after a bump.
    pub bumped: Evr,
    /// The tarball becomes available on this check (1-based), or never.
    pub tarball_on_check: Option<u32>,
    pub fail_submit: bool,
}

impl FakeDistgit {
    /// Branched, tagged, bumps `1.2.2-1` to `1.2.3-1`, tarball ready.
    pub fn ready() -> Self {
        Self {
            branched: true,
            tagged: true,
            evr: Evr::new(0, "1.2.2", "1"),
            bumped: Evr::new(0, "1.2.3", "1"),
            tarball_on_check: Some(1),
            fail_submit: false,
        }
    }
}

#[derive(Default)]
pub struct FakeTool {
    distgits: RefCell<HashMap<String, FakeDistgit>>,
    bumped: RefCell<HashSet<String>>,
    tarball_checks: RefCell<HashMap<String, u32>>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeTool {
    pub fn with(self, name: &str, distgit: FakeDistgit) -> Self {
        self.distgits
            .borrow_mut()
            .insert(name.to_string(), distgit);
        self
    }

    /// Change a distgit between runs.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut FakeDistgit)) {
        if let Some(d) = self.distgits.borrow_mut().get_mut(name) {
            f(d);
        }
        self.tarball_checks.borrow_mut().remove(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split_whitespace().nth(1) == Some(name))
            .collect()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("submit "))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn distgit(&self, name: &str) -> Result<FakeDistgit> {
        self.distgits
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| ReleaseError::tool("rdopkg", format!("clone of {name} failed")))
    }
}

impl PackagingTool for FakeTool {
    fn prepare(&self, package: &str) -> Result<()> {
        self.record(format!("prepare {package}"));
        self.distgit(package)?;
        self.bumped.borrow_mut().remove(package);
        Ok(())
    }

    fn checkout_stable(&self, package: &str, release: &str) -> Result<BranchCheckout> {
        self.record(format!("checkout {package} {release}"));
        Ok(if self.distgit(package)?.branched {
            BranchCheckout::Branched
        } else {
            BranchCheckout::NotBranched
        })
    }

    fn tag_exists(&self, package: &str, version: &str) -> Result<bool> {
        self.record(format!("tag {package} {version}"));
        Ok(self.distgit(package)?.tagged)
    }

    fn evr(&self, package: &str) -> Result<Evr> {
        self.record(format!("evr {package}"));
        let d = self.distgit(package)?;
        Ok(if self.bumped.borrow().contains(package) {
            d.bumped
        } else {
            d.evr
        })
    }

    fn new_version(
        &self,
        package: &str,
        version: &str,
        release: &str,
        mode: BumpMode,
    ) -> Result<()> {
        self.record(format!("bump {package} {version} {release} {mode:?}"));
        self.distgit(package)?;
        self.bumped.borrow_mut().insert(package.to_string());
        Ok(())
    }

    fn tarball_exists(&self, package: &str) -> Result<bool> {
        self.record(format!("tarball {package}"));
        let d = self.distgit(package)?;
        let mut checks = self.tarball_checks.borrow_mut();
        let n = checks.entry(package.to_string()).or_insert(0);
        *n += 1;
        Ok(d.tarball_on_check.is_some_and(|on| *n >= on))
    }

    fn submit_review(&self, package: &str, release: &str) -> Result<()> {
        if self.distgit(package)?.fail_submit {
            return Err(ReleaseError::tool("git", "git review failed: permission denied"));
        }
        self.record(format!("submit {package} {release}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sleep
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingSleep {
    pub count: Cell<u32>,
}

impl Sleep for CountingSleep {
    fn sleep(&self, _duration: Duration) {
        self.count.set(self.count.get() + 1);
    }
}
