//! Turn merged release reviews into package records.

use tracing::{info, warn};

use crate::deliverable::{new_releases_for_review, DeliverableSource, NewRelease, VersionFilter};
use crate::error::Result;
use crate::gerrit::ChangeInfo;
use crate::rdoinfo::PackageIndex;
use crate::record::NewPackage;

/// Packages introduced by `change`, one per repository that maps to a known
/// package, across every series the review touches.
pub fn packages_for_review(
    change: &ChangeInfo,
    source: &dyn DeliverableSource,
    index: &dyn PackageIndex,
    filter: &VersionFilter,
) -> Result<Vec<NewPackage>> {
    let commit_date = change.submitted_timestamp()?;
    let releases = new_releases_for_review(change, source, filter)?;
    Ok(packages_for_releases(
        &releases,
        index,
        commit_date,
        Some(change.number),
    ))
}

pub fn packages_for_releases(
    releases: &[NewRelease],
    index: &dyn PackageIndex,
    release_date: i64,
    review_number: Option<u64>,
) -> Vec<NewPackage> {
    let mut packages = Vec::new();
    for release in releases {
        if release.repos.is_empty() {
            warn!(
                "{} {} ({}) lists no repositories",
                release.path, release.version, release.series
            );
        }
        for repo in &release.repos {
            match index.package_for_repo(repo) {
                Some(name) => {
                    info!(
                        "new release {name} {} ({}) from {repo}",
                        release.version, release.series
                    );
                    packages.push(NewPackage::new(
                        name,
                        release.version.clone(),
                        release.series.clone(),
                        release_date,
                        review_number,
                    ));
                }
                None => info!("{repo} is not packaged in RDO, skipping"),
            }
        }
    }
    packages
}
