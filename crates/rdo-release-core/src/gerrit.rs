//! Gerrit REST client for merged `openstack/releases` reviews.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReleaseError, Result};

pub const DEFAULT_GERRIT_URL: &str = "https://review.opendev.org";
pub const RELEASES_PROJECT: &str = "openstack/releases";

/// Gerrit prepends this to every JSON body to defeat XSSI.
const XSSI_PREFIX: &str = ")]}'";

const QUERY_OPTIONS: [&str; 3] = ["CURRENT_REVISION", "ALL_FILES", "CURRENT_COMMIT"];

/// Timestamp format of Gerrit's `submitted` field, always UTC.
const SUBMITTED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeInfo {
    #[serde(rename = "_number")]
    pub number: u64,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub submitted: Option<String>,
    #[serde(default)]
    pub current_revision: Option<String>,
    #[serde(default)]
    pub revisions: HashMap<String, RevisionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionInfo {
    #[serde(default)]
    pub commit: Option<CommitInfo>,
    #[serde(default)]
    pub files: HashMap<String, FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub parents: Vec<ParentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentInfo {
    pub commit: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    /// `A`dded, `D`eleted, `R`enamed, `C`opied, `W`ritten; absent means modified.
    #[serde(default)]
    pub status: Option<String>,
}

impl FileInfo {
    pub fn is_deleted(&self) -> bool {
        self.status.as_deref() == Some("D")
    }
}

impl ChangeInfo {
    /// The current revision's sha and details.
    pub fn current(&self) -> Option<(&str, &RevisionInfo)> {
        let sha = self.current_revision.as_deref()?;
        self.revisions.get(sha).map(|rev| (sha, rev))
    }

    /// First parent of the current revision.
    pub fn parent_commit(&self) -> Option<&str> {
        let (_, rev) = self.current()?;
        rev.commit
            .as_ref()?
            .parents
            .first()
            .map(|p| p.commit.as_str())
    }

    /// `submitted` as seconds since the epoch.
    pub fn submitted_timestamp(&self) -> Result<i64> {
        let raw = self.submitted.as_deref().ok_or_else(|| {
            ReleaseError::Gerrit(format!("review {} has no submit time", self.number))
        })?;
        parse_submitted(raw)
    }
}

pub fn parse_submitted(raw: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(raw.trim(), SUBMITTED_FORMAT)
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| ReleaseError::Gerrit(format!("bad submit time '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// ReviewSource
// ---------------------------------------------------------------------------

/// Where merged release reviews come from.
pub trait ReviewSource {
    /// Merged reviews touching `deliverables/<release>`, either submitted
    /// after `after` or, when `number` is set, just that review.
    fn merged_release_reviews(
        &self,
        release: &str,
        after: Option<NaiveDate>,
        number: Option<u64>,
    ) -> Result<Vec<ChangeInfo>>;
}

/// Build the Gerrit search expression for release reviews.
pub fn release_query(release: &str, after: Option<NaiveDate>, number: Option<u64>) -> String {
    let mut terms = vec![
        "status:merged".to_string(),
        format!("project:{RELEASES_PROJECT}"),
        "file:deliverables".to_string(),
        format!("file:{release}"),
    ];
    if let Some(n) = number {
        terms.push(format!("change:{n}"));
    } else if let Some(date) = after {
        terms.push(format!("after:{}", date.format("%Y-%m-%d")));
    }
    terms.join(" ")
}

// ---------------------------------------------------------------------------
// GerritClient
// ---------------------------------------------------------------------------

/// Synchronous, anonymous Gerrit REST client.
#[derive(Clone)]
pub struct GerritClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GerritClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("rdo-release/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Run a change query and decode the result list.
    pub fn query_changes(&self, query: &str) -> Result<Vec<ChangeInfo>> {
        let url = format!("{}/changes/", self.base_url);
        let mut params: Vec<(&str, &str)> = vec![("q", query)];
        params.extend(QUERY_OPTIONS.iter().map(|o| ("o", *o)));

        debug!("gerrit query: {query}");
        let response = self.client.get(&url).query(&params).send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(ReleaseError::Gerrit(format!(
                "{status} from {url}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        decode_body(&body)
    }
}

impl ReviewSource for GerritClient {
    fn merged_release_reviews(
        &self,
        release: &str,
        after: Option<NaiveDate>,
        number: Option<u64>,
    ) -> Result<Vec<ChangeInfo>> {
        self.query_changes(&release_query(release, after, number))
    }
}

fn decode_body(body: &str) -> Result<Vec<ChangeInfo>> {
    let json = body.strip_prefix(XSSI_PREFIX).unwrap_or(body);
    Ok(serde_json::from_str(json.trim_start())?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
