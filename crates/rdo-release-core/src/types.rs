use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PackageStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a package release attempt.
///
/// `New`, `Failed` and `Retry` are queued; `Created`, `NotRequired` and
/// `NotBranched` are terminal. `Processed` is only ever written by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageStatus {
    New,
    Processed,
    Created,
    Failed,
    Retry,
    NotRequired,
    #[serde(rename = "NOTBRANCHED")]
    NotBranched,
}

impl PackageStatus {
    pub fn all() -> &'static [PackageStatus] {
        &[
            PackageStatus::New,
            PackageStatus::Processed,
            PackageStatus::Created,
            PackageStatus::Failed,
            PackageStatus::Retry,
            PackageStatus::NotRequired,
            PackageStatus::NotBranched,
        ]
    }

    /// Statuses picked up by every batch until they reach a terminal state.
    pub fn queued() -> &'static [PackageStatus] {
        &[PackageStatus::New, PackageStatus::Failed, PackageStatus::Retry]
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PackageStatus::Processed
                | PackageStatus::Created
                | PackageStatus::NotRequired
                | PackageStatus::NotBranched
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageStatus::New => "NEW",
            PackageStatus::Processed => "PROCESSED",
            PackageStatus::Created => "CREATED",
            PackageStatus::Failed => "FAILED",
            PackageStatus::Retry => "RETRY",
            PackageStatus::NotRequired => "NOT_REQUIRED",
            PackageStatus::NotBranched => "NOTBRANCHED",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PackageStatus {
    type Err = crate::error::ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "NEW" => Ok(PackageStatus::New),
            "PROCESSED" => Ok(PackageStatus::Processed),
            "CREATED" => Ok(PackageStatus::Created),
            "FAILED" => Ok(PackageStatus::Failed),
            "RETRY" => Ok(PackageStatus::Retry),
            "NOT_REQUIRED" => Ok(PackageStatus::NotRequired),
            "NOTBRANCHED" | "NOT_BRANCHED" => Ok(PackageStatus::NotBranched),
            _ => Err(crate::error::ReleaseError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ReviewStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Processed,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = crate::error::ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSED" => Ok(ReviewStatus::Processed),
            _ => Err(crate::error::ReleaseError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SortOrder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
