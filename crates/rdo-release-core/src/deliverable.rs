//! Deliverable declarations from `openstack/releases`.
//!
//! Each file under `deliverables/<series>/` declares a team, an ordered
//! list of releases and, per release, the repositories it covers. A merged
//! review introduces a new release when the last declared version differs
//! from the one in the review's parent commit.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::gerrit::ChangeInfo;

pub const DEFAULT_RELEASES_RAW_URL: &str =
    "https://raw.githubusercontent.com/openstack/releases";

/// Last release declared in one deliverable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverableRelease {
    pub team: String,
    pub version: String,
    pub repos: Vec<String>,
}

/// One new upstream release introduced by a merged review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub team: String,
    pub version: String,
    pub repos: Vec<String>,
    pub series: String,
    pub path: String,
}

// ---------------------------------------------------------------------------
// DeliverableSource
// ---------------------------------------------------------------------------

/// Reads deliverable files at a given commit of `openstack/releases`.
pub trait DeliverableSource {
    /// File content, or `None` when the file does not exist at `commit`.
    fn fetch(&self, commit: &str, path: &str) -> Result<Option<String>>;
}

/// Raw-file HTTP mirror of the releases repository.
pub struct HttpDeliverableSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpDeliverableSource {
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
}

impl DeliverableSource for HttpDeliverableSource {
    fn fetch(&self, commit: &str, path: &str) -> Result<Option<String>> {
        let url = format!("{}/{commit}/{path}", self.base_url);
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            debug!("{} fetching {url}", response.status());
            return Ok(None);
        }
        Ok(Some(response.text()?))
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

static SERIES_RE: OnceLock<Regex> = OnceLock::new();

fn series_re() -> &'static Regex {
    SERIES_RE.get_or_init(|| Regex::new(r"^deliverables/(.+)/[^/]+$").unwrap())
}

/// Series name for a path under `deliverables/`, if it is one.
pub fn series_of(path: &str) -> Option<&str> {
    series_re()
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// YAML scalars such as `version: 2.0` decode as numbers; keep their text.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the last declared release. `None` when the content is not a
/// deliverable or declares no releases.
pub fn parse_deliverable(content: &str) -> Option<DeliverableRelease> {
    let doc: Value = serde_yaml::from_str(content).ok()?;
    let team = doc.get("team").and_then(scalar).unwrap_or_default();
    let last = doc.get("releases")?.as_sequence()?.last()?;
    let version = last.get("version").and_then(scalar)?;
    let repos = last
        .get("projects")
        .and_then(Value::as_sequence)
        .map(|projects| {
            projects
                .iter()
                .filter_map(|p| p.get("repo").and_then(scalar))
                .collect()
        })
        .unwrap_or_default();
    Some(DeliverableRelease {
        team,
        version,
        repos,
    })
}

/// Version patterns that never produce packaging work, such as end-of-life
/// markers (`train-eol`).
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    excluded: Vec<Regex>,
}

impl VersionFilter {
    pub fn new(excluded: Vec<Regex>) -> Self {
        Self { excluded }
    }

    pub fn is_excluded(&self, version: &str) -> bool {
        self.excluded.iter().any(|re| re.is_match(version))
    }
}

// ---------------------------------------------------------------------------
// Review analysis
// ---------------------------------------------------------------------------

/// New releases introduced by `change`, one per changed deliverable file.
///
/// Deleted files and paths outside `deliverables/<series>/` are skipped. A
/// file whose parent revision is missing or unparseable counts as new.
pub fn new_releases_for_review(
    change: &ChangeInfo,
    source: &dyn DeliverableSource,
    filter: &VersionFilter,
) -> Result<Vec<NewRelease>> {
    let Some((sha, revision)) = change.current() else {
        debug!("review {} has no current revision", change.number);
        return Ok(Vec::new());
    };
    let parent = change.parent_commit();

    let mut paths: Vec<&String> = revision.files.keys().collect();
    paths.sort();

    let mut releases = Vec::new();
    for path in paths {
        if revision.files[path].is_deleted() {
            continue;
        }
        let Some(series) = series_of(path) else {
            continue;
        };
        let Some(current) = source.fetch(sha, path)?.as_deref().and_then(parse_deliverable)
        else {
            debug!("{path} at {sha} declares no release");
            continue;
        };
        let previous = match parent {
            Some(parent) => source
                .fetch(parent, path)?
                .as_deref()
                .and_then(parse_deliverable),
            None => None,
        };
        if previous.is_some_and(|p| p.version == current.version) {
            debug!("{path}: version {} unchanged", current.version);
            continue;
        }
        if filter.is_excluded(&current.version) {
            info!(
                "review {}: skipping {} {} (excluded version)",
                change.number, path, current.version
            );
            continue;
        }
        releases.push(NewRelease {
            team: current.team,
            version: current.version,
            repos: current.repos,
            series: series.to_string(),
            path: path.clone(),
        });
    }
    Ok(releases)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDeliverables;
    use crate::gerrit::{CommitInfo, FileInfo, ParentInfo, RevisionInfo};
    use std::collections::HashMap;

    const OSLO_V1: &str = "\
team: oslo
releases:
  - version: 1.2.2
    projects:
      - repo: openstack/oslo.config
        hash: aaa
";

    const OSLO_V2: &str = "\
team: oslo
releases:
  - version: 1.2.2
    projects:
      - repo: openstack/oslo.config
        hash: aaa
  - version: 1.2.3
    projects:
      - repo: openstack/oslo.config
        hash: bbb
";

    fn change(files: &[(&str, Option<&str>)]) -> ChangeInfo {
        let files = files
            .iter()
            .map(|(path, status)| {
                (
                    path.to_string(),
                    FileInfo {
                        status: status.map(str::to_string),
                    },
                )
            })
            .collect();
        let revision = RevisionInfo {
            commit: Some(CommitInfo {
                parents: vec![ParentInfo {
                    commit: "parent".into(),
                }],
            }),
            files,
        };
        ChangeInfo {
            number: 1001,
            project: None,
            subject: None,
            submitted: Some("2019-10-01 12:00:00.000000000".into()),
            current_revision: Some("head".into()),
            revisions: HashMap::from([("head".to_string(), revision)]),
        }
    }

    #[test]
    fn series_from_path() {
        assert_eq!(series_of("deliverables/train/oslo.config.yaml"), Some("train"));
        assert_eq!(series_of("deliverables/_independent/reno.yaml"), Some("_independent"));
        assert_eq!(series_of("/COMMIT_MSG"), None);
        assert_eq!(series_of("README.rst"), None);
    }

    #[test]
    fn parses_last_release_and_numeric_versions() {
        let rel = parse_deliverable(OSLO_V2).unwrap();
        assert_eq!(rel.team, "oslo");
        assert_eq!(rel.version, "1.2.3");
        assert_eq!(rel.repos, vec!["openstack/oslo.config".to_string()]);

        let numeric = parse_deliverable("team: x\nreleases:\n  - version: 2.5\n").unwrap();
        assert_eq!(numeric.version, "2.5");
        assert!(numeric.repos.is_empty());

        assert!(parse_deliverable("team: x\nreleases: []\n").is_none());
        assert!(parse_deliverable(": not yaml :").is_none());
    }

    #[test]
    fn version_change_is_new_release() {
        let source = FakeDeliverables::default()
            .with("head", "deliverables/train/oslo.config.yaml", OSLO_V2)
            .with("parent", "deliverables/train/oslo.config.yaml", OSLO_V1);
        let change = change(&[("deliverables/train/oslo.config.yaml", None), ("/COMMIT_MSG", None)]);
        let releases =
            new_releases_for_review(&change, &source, &VersionFilter::default()).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].version, "1.2.3");
        assert_eq!(releases[0].series, "train");
        assert_eq!(releases[0].repos, vec!["openstack/oslo.config".to_string()]);
    }

    #[test]
    fn unchanged_version_is_not_new() {
        let source = FakeDeliverables::default()
            .with("head", "deliverables/train/oslo.config.yaml", OSLO_V2)
            .with("parent", "deliverables/train/oslo.config.yaml", OSLO_V2);
        let change = change(&[("deliverables/train/oslo.config.yaml", None)]);
        let releases =
            new_releases_for_review(&change, &source, &VersionFilter::default()).unwrap();
        assert!(releases.is_empty());
    }

    #[test]
    fn missing_parent_counts_as_new() {
        let source = FakeDeliverables::default()
            .with("head", "deliverables/train/oslo.config.yaml", OSLO_V1)
            .with("parent", "deliverables/train/oslo.config.yaml", "{{ broken");
        let change = change(&[("deliverables/train/oslo.config.yaml", Some("A"))]);
        let releases =
            new_releases_for_review(&change, &source, &VersionFilter::default()).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].version, "1.2.2");
    }

    #[test]
    fn deleted_files_and_excluded_versions_are_skipped() {
        let eol = "team: oslo\nreleases:\n  - version: train-eol\n    projects:\n      - repo: openstack/oslo.config\n";
        let source = FakeDeliverables::default()
            .with("head", "deliverables/train/oslo.config.yaml", eol)
            .with("head", "deliverables/stein/oslo.config.yaml", OSLO_V2);
        let change = change(&[
            ("deliverables/train/oslo.config.yaml", None),
            ("deliverables/stein/oslo.config.yaml", Some("D")),
        ]);
        let filter = VersionFilter::new(vec![Regex::new(r"-eol$").unwrap()]);
        let releases = new_releases_for_review(&change, &source, &filter).unwrap();
        assert!(releases.is_empty());
    }

    #[test]
    fn http_source_returns_none_on_404() {
        let mut server = mockito::Server::new();
        let _found = server
            .mock("GET", "/head/deliverables/train/a.yaml")
            .with_status(200)
            .with_body(OSLO_V1)
            .create();
        let _missing = server
            .mock("GET", "/parent/deliverables/train/a.yaml")
            .with_status(404)
            .create();

        let source = HttpDeliverableSource::new(server.url()).unwrap();
        let found = source.fetch("head", "deliverables/train/a.yaml").unwrap();
        assert_eq!(found.as_deref(), Some(OSLO_V1));
        assert_eq!(source.fetch("parent", "deliverables/train/a.yaml").unwrap(), None);
    }
}
