//! Rows of the status store.
//!
//! A `Review` is the dedup watermark for one merged upstream review. A
//! `Package` is one unit of release work and doubles as its audit trail:
//! rows are mutated in place and never deleted.

use serde::{Deserialize, Serialize};

use crate::types::{PackageStatus, ReviewStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub review_number: u64,
    pub commit_date: i64,
    pub process_date: i64,
    pub target_release: String,
    pub status: ReviewStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub release_date: i64,
    pub process_date: i64,
    pub review_number: Option<u64>,
    pub target_release: String,
    pub status: PackageStatus,
    pub retries: u32,
}

/// A package release discovered by ingestion, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPackage {
    pub name: String,
    pub version: String,
    pub release_date: i64,
    pub review_number: Option<u64>,
    pub target_release: String,
}

impl NewPackage {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        target_release: impl Into<String>,
        release_date: i64,
        review_number: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            release_date,
            review_number,
            target_release: target_release.into(),
        }
    }
}

impl Package {
    /// `name version (release)`, used as the log prefix for every attempt.
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.name, self.version, self.target_release)
    }
}
