//! The release reconciler: ingest merged reviews, then drive every queued
//! package through the packaging pipeline and record the outcome.
//!
//! Per package the pipeline is:
//!
//! 1. pin check against the registry;
//! 2. fresh clone and checkout of `<release>-rdo`;
//! 3. optional upstream tag check;
//! 4. dry-run bump and EVR comparison;
//! 5. source tarball readiness;
//! 6. real bump and review submission.
//!
//! Statuses only move forward through the store. Terminal rows
//! (`CREATED`, `NOT_REQUIRED`, `NOTBRANCHED`, `PROCESSED`) never re-enter the
//! queue, which is what makes repeated runs over the same window idempotent.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{RunConfig, TarballPolicy};
use crate::deliverable::{new_releases_for_review, DeliverableSource};
use crate::distgit::{BranchCheckout, BumpMode, PackagingTool};
use crate::error::Result;
use crate::evr::Evr;
use crate::gerrit::{ChangeInfo, ReviewSource};
use crate::ingest::packages_for_review;
use crate::poller::{wait_for_artifact, Sleep};
use crate::rdoinfo::{PackageIndex, PinChange, PinLookup, PinRegistry};
use crate::record::{NewPackage, Package};
use crate::store::{PackageFilter, StatusStore};
use crate::types::{PackageStatus, SortOrder};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotRequiredReason {
    NotInRegistry,
    NotInRelease,
    /// The bump would not produce a newer build.
    NotNewer { current: Evr, bumped: Evr },
}

impl fmt::Display for NotRequiredReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInRegistry => f.write_str("not in rdoinfo"),
            Self::NotInRelease => f.write_str("not in this release"),
            Self::NotNewer { current, bumped } => {
                write!(f, "{bumped} is not newer than {current}")
            }
        }
    }
}

/// What one attempt decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    /// Dry run reached the submit step.
    WouldSubmit,
    NotRequired(NotRequiredReason),
    NotBranched,
    /// The registry pins another version; left queued.
    PinMismatch { pin: String },
    /// Upstream has no tag for the version yet; left queued.
    TagMissing,
    /// Tarball not available; retried on a later run.
    Retry,
    Failed(String),
}

impl Outcome {
    /// Status to persist, or `None` to leave the row untouched.
    pub fn status(&self) -> Option<PackageStatus> {
        match self {
            Self::Created => Some(PackageStatus::Created),
            Self::NotRequired(_) => Some(PackageStatus::NotRequired),
            Self::NotBranched => Some(PackageStatus::NotBranched),
            Self::Retry => Some(PackageStatus::Retry),
            Self::Failed(_) => Some(PackageStatus::Failed),
            Self::WouldSubmit | Self::PinMismatch { .. } | Self::TagMissing => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("review created"),
            Self::WouldSubmit => f.write_str("would submit (dry run)"),
            Self::NotRequired(reason) => write!(f, "not required: {reason}"),
            Self::NotBranched => f.write_str("release branch missing"),
            Self::PinMismatch { pin } => write!(f, "pinned to {pin}"),
            Self::TagMissing => f.write_str("upstream tag missing"),
            Self::Retry => f.write_str("tarball not ready, will retry"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub reviews_seen: usize,
    pub reviews_known: usize,
    pub reviews_recorded: usize,
    /// Left unrecorded so the next run retries them.
    pub reviews_failed: usize,
    pub packages_added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub package: Package,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<PackageResult>,
    /// Set when `stop_on_failure` cut the batch short.
    pub stopped: bool,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
            .count()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub batch: BatchReport,
}

/// One line of the new-release listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedRelease {
    pub review_number: u64,
    pub submitted: String,
    pub version: String,
    pub package: String,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// External systems the reconciler talks to.
pub struct Collaborators<'a> {
    pub reviews: &'a dyn ReviewSource,
    pub deliverables: &'a dyn DeliverableSource,
    pub index: &'a dyn PackageIndex,
    pub pins: &'a dyn PinRegistry,
    pub tool: &'a dyn PackagingTool,
    pub sleeper: &'a dyn Sleep,
}

pub struct Reconciler<'a> {
    config: &'a RunConfig,
    store: &'a StatusStore,
    deps: Collaborators<'a>,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a RunConfig, store: &'a StatusStore, deps: Collaborators<'a>) -> Self {
        Self {
            config,
            store,
            deps,
        }
    }

    /// Ingest the review window, then process the queue.
    ///
    /// A failed Gerrit query is logged and the queue is still processed;
    /// store errors abort.
    pub fn run(&self, today: NaiveDate) -> Result<RunReport> {
        let ingest = match self.ingest_reviews(today) {
            Ok(report) => report,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("review ingestion failed: {e}");
                IngestReport::default()
            }
        };
        let batch = self.process_packages()?;
        Ok(RunReport { ingest, batch })
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Record every unseen review of the window and queue its packages.
    ///
    /// A review whose deliverables cannot be read is not recorded, so the
    /// next run looks at it again.
    pub fn ingest_reviews(&self, today: NaiveDate) -> Result<IngestReport> {
        let release = &self.config.release;
        let changes = fetch_reviews(self.config, self.deps.reviews, today)?;
        let mut report = IngestReport {
            reviews_seen: changes.len(),
            ..IngestReport::default()
        };

        for change in &changes {
            if self.store.has_review(change.number)? {
                info!("review {} already in database, skipping", change.number);
                report.reviews_known += 1;
                continue;
            }
            let expanded =
                expand_review(change, self.deps.deliverables, self.deps.index, self.config);
            let (commit_date, packages) = match expanded {
                Ok(expanded) => expanded,
                Err(e) => {
                    error!("review {}: {e}", change.number);
                    report.reviews_failed += 1;
                    continue;
                }
            };
            for pkg in packages.iter().filter(|p| &p.target_release == release) {
                if self.already_recorded(pkg)? {
                    continue;
                }
                self.store.insert_package(pkg, PackageStatus::New)?;
                report.packages_added += 1;
            }
            self.store.insert_review(change.number, commit_date, release)?;
            report.reviews_recorded += 1;
        }

        info!(
            "ingested {} new reviews ({} known, {} failed), {} packages queued",
            report.reviews_recorded, report.reviews_known, report.reviews_failed, report.packages_added
        );
        Ok(report)
    }

    fn already_recorded(&self, pkg: &NewPackage) -> Result<bool> {
        let filter = PackageFilter {
            name: Some(pkg.name.clone()),
            version: Some(pkg.version.clone()),
            target_release: Some(pkg.target_release.clone()),
            review_number: pkg.review_number,
            ..PackageFilter::default()
        };
        Ok(!self.store.find_packages(&filter, SortOrder::Asc)?.is_empty())
    }

    /// Queue packages for pins that appeared or moved in the registry.
    pub fn ingest_pins(&self, changes: &[PinChange]) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut added = 0;
        for change in changes.iter().filter(|c| c.release == self.config.release) {
            let pkg = NewPackage::new(&change.name, &change.version, &change.release, now, None);
            if self.already_recorded(&pkg)? {
                info!(
                    "{} {} ({}) already recorded, skipping",
                    pkg.name, pkg.version, pkg.target_release
                );
                continue;
            }
            info!(
                "new pin {} {} ({})",
                pkg.name, pkg.version, pkg.target_release
            );
            self.store.insert_package(&pkg, PackageStatus::New)?;
            added += 1;
        }
        Ok(added)
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    /// Packages of the target release in NEW, then FAILED, then RETRY,
    /// each group oldest first.
    pub fn queue(&self) -> Result<Vec<Package>> {
        let mut queue = Vec::new();
        for status in PackageStatus::queued() {
            let filter = PackageFilter::release(self.config.release.clone()).with_status(*status);
            queue.extend(self.store.find_packages(&filter, SortOrder::Asc)?);
        }
        Ok(queue)
    }

    /// Attempt every queued package, one after another.
    pub fn process_packages(&self) -> Result<BatchReport> {
        let queue = self.queue()?;
        info!(
            "{} packages to process for {}",
            queue.len(),
            self.config.release
        );

        let mut report = BatchReport::default();
        for mut pkg in queue {
            let outcome = self.process_package(&mut pkg)?;
            let stop = matches!(outcome, Outcome::Failed(_)) && self.config.stop_on_failure;
            report.results.push(PackageResult {
                package: pkg,
                outcome,
            });
            if stop {
                warn!("stopping after failure as requested");
                report.stopped = true;
                break;
            }
        }
        Ok(report)
    }

    /// Run one attempt and persist its outcome. Dry runs persist nothing.
    pub fn process_package(&self, pkg: &mut Package) -> Result<Outcome> {
        info!("processing {}", pkg.label());
        let outcome = match self.attempt(pkg) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("{}: {e}", pkg.label());
                Outcome::Failed(e.to_string())
            }
        };

        if self.config.dry_run {
            info!("{}: {outcome}, status left as {}", pkg.label(), pkg.status);
            return Ok(outcome);
        }
        match outcome.status() {
            Some(PackageStatus::Retry) => self.store.record_retry(pkg)?,
            Some(status) => self.store.update_status(pkg, status)?,
            None => {}
        }
        info!("{}: {outcome}", pkg.label());
        Ok(outcome)
    }

    fn attempt(&self, pkg: &Package) -> Result<Outcome> {
        let name = pkg.name.as_str();
        let version = pkg.version.as_str();
        let release = pkg.target_release.as_str();
        let tool = self.deps.tool;

        match self.deps.pins.pin(name, release)? {
            PinLookup::Pinned(pin) if pin != version => {
                info!("{}: pinned to {pin} in rdoinfo, skipping", pkg.label());
                return Ok(Outcome::PinMismatch { pin });
            }
            PinLookup::NotInRegistry => {
                info!("{name} is not in rdoinfo");
                return Ok(Outcome::NotRequired(NotRequiredReason::NotInRegistry));
            }
            PinLookup::NotInRelease => {
                info!("{name} is not part of {release} in rdoinfo");
                return Ok(Outcome::NotRequired(NotRequiredReason::NotInRelease));
            }
            PinLookup::Pinned(_) | PinLookup::Unpinned => {}
        }

        tool.prepare(name)?;
        if tool.checkout_stable(name, release)? == BranchCheckout::NotBranched {
            info!("{name} has no {release}-rdo branch yet");
            return Ok(Outcome::NotBranched);
        }

        if self.config.require_tag && !tool.tag_exists(name, version)? {
            info!("{}: upstream tag {version} not found", pkg.label());
            return Ok(Outcome::TagMissing);
        }

        let current = tool.evr(name)?;
        tool.new_version(name, version, release, BumpMode::DryRun)?;
        let bumped = tool.evr(name)?;
        if !bumped.is_newer_than(&current) {
            info!("{}: {bumped} is not newer than {current}", pkg.label());
            return Ok(Outcome::NotRequired(NotRequiredReason::NotNewer {
                current,
                bumped,
            }));
        }

        if !self.tarball_ready(pkg) {
            warn!("{}: source tarball is not available yet", pkg.label());
            return Ok(Outcome::Retry);
        }

        if self.config.dry_run {
            info!("{}: would submit {current} -> {bumped}", pkg.label());
            return Ok(Outcome::WouldSubmit);
        }

        tool.new_version(name, version, release, BumpMode::Commit)?;
        tool.submit_review(name, release)?;
        info!("{}: review submitted", pkg.label());
        Ok(Outcome::Created)
    }

    fn tarball_ready(&self, pkg: &Package) -> bool {
        let check = || self.deps.tool.tarball_exists(&pkg.name);
        let (attempts, interval) = match &self.config.tarball {
            _ if self.config.dry_run => (1, Duration::ZERO),
            TarballPolicy::RetryLater => (1, Duration::ZERO),
            policy @ TarballPolicy::Poll { .. } => (policy.max_attempts(), policy.interval()),
        };
        wait_for_artifact(&check, attempts, interval, self.deps.sleeper)
    }
}

// ---------------------------------------------------------------------------
// Review window
// ---------------------------------------------------------------------------

/// Merged reviews of the configured window, by ascending number.
fn fetch_reviews(
    config: &RunConfig,
    reviews: &dyn ReviewSource,
    today: NaiveDate,
) -> Result<Vec<ChangeInfo>> {
    let mut changes =
        reviews.merged_release_reviews(&config.release, config.since(today), config.review_number)?;
    changes.sort_by_key(|c| c.number);
    changes.dedup_by_key(|c| c.number);
    Ok(changes)
}

fn expand_review(
    change: &ChangeInfo,
    deliverables: &dyn DeliverableSource,
    index: &dyn PackageIndex,
    config: &RunConfig,
) -> Result<(i64, Vec<NewPackage>)> {
    let commit_date = change.submitted_timestamp()?;
    let packages = packages_for_review(change, deliverables, index, &config.version_filter)?;
    Ok((commit_date, packages))
}

/// New releases of the configured window for the target release. Reads
/// only; nothing is recorded. Repositories RDO does not package are listed
/// under their repository name.
pub fn list_new_releases(
    config: &RunConfig,
    reviews: &dyn ReviewSource,
    deliverables: &dyn DeliverableSource,
    index: &dyn PackageIndex,
    today: NaiveDate,
) -> Result<Vec<ListedRelease>> {
    let mut listed = Vec::new();
    for change in fetch_reviews(config, reviews, today)? {
        let releases =
            match new_releases_for_review(&change, deliverables, &config.version_filter) {
                Ok(releases) => releases,
                Err(e) => {
                    error!("review {}: {e}", change.number);
                    continue;
                }
            };
        let submitted = change.submitted.clone().unwrap_or_default();
        for release in releases.iter().filter(|r| r.series == config.release) {
            for repo in &release.repos {
                listed.push(ListedRelease {
                    review_number: change.number,
                    submitted: submitted.clone(),
                    version: release.version.clone(),
                    package: index
                        .package_for_repo(repo)
                        .unwrap_or_else(|| repo.clone()),
                });
            }
        }
    }
    Ok(listed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
