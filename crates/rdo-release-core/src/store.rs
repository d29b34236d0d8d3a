//! SQLite-backed status store for reviews and packages.
//!
//! # Schema
//!
//! ```text
//! reviews(id, review, commit_date, process_date, osp_release, status)
//! packages(id, name, version, release_date, process_date, review_number,
//!          osp_release, status, retries)
//! ```
//!
//! Column names follow the databases written by earlier releases of the
//! tooling so existing `reviews.sqlite` files keep working. Every write
//! commits immediately; there is no batching.
//!
//! # Shared handles
//!
//! `StatusStore::open` hands out one live handle per backing file. A second
//! `open` of the same location returns the same `Arc` for as long as any
//! holder keeps it alive. `open_fresh` always connects anew and replaces the
//! shared handle.
//!
//! The schema version lives in `PRAGMA user_version`. When the schema changes,
//! bump `SCHEMA_VERSION` and add a `migrate_v{N}_to_v{N+1}` step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::debug;

use crate::error::{ReleaseError, Result};
use crate::record::{NewPackage, Package, Review};
use crate::types::{PackageStatus, ReviewStatus, SortOrder};

const SCHEMA_VERSION: i32 = 1;

/// Default row cap for review queries.
pub const DEFAULT_REVIEW_LIMIT: u32 = 100;

static OPEN_STORES: OnceLock<Mutex<HashMap<PathBuf, Weak<StatusStore>>>> = OnceLock::new();

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub review_number: Option<u64>,
    pub status: Option<ReviewStatus>,
    pub status_not: Option<ReviewStatus>,
    pub target_release: Option<String>,
    /// Exclusive lower bound on `commit_date`.
    pub since: Option<i64>,
    /// Exclusive upper bound on `commit_date`.
    pub before: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub review_number: Option<u64>,
    pub status: Option<PackageStatus>,
    pub status_not: Option<PackageStatus>,
    pub target_release: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Exclusive lower bound on `release_date`.
    pub since: Option<i64>,
    /// Exclusive upper bound on `release_date`.
    pub before: Option<i64>,
}

impl PackageFilter {
    pub fn release(release: impl Into<String>) -> Self {
        Self {
            target_release: Some(release.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: PackageStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Accumulates `WHERE` clauses and their bound values.
#[derive(Default)]
struct Where {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Where {
    fn push(&mut self, clause: &'static str, value: Value) {
        self.clauses.push(clause);
        self.values.push(value);
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn int(v: u64) -> Value {
    Value::Integer(v as i64)
}

fn text(v: &str) -> Value {
    Value::Text(v.to_string())
}

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

/// Durable record store for `Review` and `Package` rows.
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a `Mutex` to let
/// handles live in the process-wide registry.
pub struct StatusStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StatusStore {
    /// Open the store at `path`, reusing a live handle to the same file.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let key = registry_key(path);
        let mut open = registry();
        if let Some(store) = open.get(&key).and_then(Weak::upgrade) {
            debug!("reusing status store handle for {}", key.display());
            return Ok(store);
        }
        let store = Arc::new(Self::connect(path)?);
        open.insert(key, Arc::downgrade(&store));
        Ok(store)
    }

    /// Open a new connection to `path`, even if a live handle exists.
    ///
    /// The new handle replaces the shared one for subsequent `open` calls.
    pub fn open_fresh(path: &Path) -> Result<Arc<Self>> {
        let store = Arc::new(Self::connect(path)?);
        registry().insert(registry_key(path), Arc::downgrade(&store));
        Ok(store)
    }

    /// Private in-memory store, never shared.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ReleaseError::StoreUnavailable {
            path: ":memory:".to_string(),
            reason: e.to_string(),
        })?;
        let store = Self {
            path: None,
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connect(path: &Path) -> Result<Self> {
        let unavailable = |reason: String| ReleaseError::StoreUnavailable {
            path: path.display().to_string(),
            reason,
        };
        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        let store = Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        };
        store.init_schema().map_err(|e| unavailable(e.to_string()))?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current > SCHEMA_VERSION {
            return Err(ReleaseError::InvalidConfig(format!(
                "status store schema version {current} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            migrate_v0_to_v1(&conn)?;
        }
        if current < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reviews
    // -----------------------------------------------------------------------

    /// Reviews matching `filter`, ordered by review number.
    ///
    /// `limit = None` returns every match.
    pub fn find_reviews(
        &self,
        filter: &ReviewFilter,
        order: SortOrder,
        limit: Option<u32>,
    ) -> Result<Vec<Review>> {
        let mut w = Where::default();
        if let Some(n) = filter.review_number {
            w.push("review = ?", int(n));
        }
        if let Some(s) = filter.status {
            w.push("status = ?", text(s.as_str()));
        }
        if let Some(s) = filter.status_not {
            w.push("status != ?", text(s.as_str()));
        }
        if let Some(ref r) = filter.target_release {
            w.push("osp_release = ?", text(r));
        }
        if let Some(t) = filter.since {
            w.push("commit_date > ?", Value::Integer(t));
        }
        if let Some(t) = filter.before {
            w.push("commit_date < ?", Value::Integer(t));
        }

        let mut sql = format!(
            "SELECT id, review, commit_date, process_date, osp_release, status FROM reviews{} ORDER BY review {}",
            w.sql(),
            order.sql()
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(w.values.iter()), review_from_row)?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row??);
        }
        Ok(reviews)
    }

    pub fn has_review(&self, review_number: u64) -> Result<bool> {
        let filter = ReviewFilter {
            review_number: Some(review_number),
            ..ReviewFilter::default()
        };
        Ok(!self.find_reviews(&filter, SortOrder::Asc, Some(1))?.is_empty())
    }

    /// Record a merged review as processed.
    pub fn insert_review(
        &self,
        review_number: u64,
        commit_date: i64,
        target_release: &str,
    ) -> Result<Review> {
        let process_date = Utc::now().timestamp();
        let status = ReviewStatus::Processed;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO reviews (review, commit_date, process_date, osp_release, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                review_number as i64,
                commit_date,
                process_date,
                target_release,
                status.as_str()
            ],
        )?;
        Ok(Review {
            id: conn.last_insert_rowid(),
            review_number,
            commit_date,
            process_date,
            target_release: target_release.to_string(),
            status,
        })
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    /// Packages matching `filter`, ordered by release date. Unbounded.
    pub fn find_packages(&self, filter: &PackageFilter, order: SortOrder) -> Result<Vec<Package>> {
        let mut w = Where::default();
        if let Some(n) = filter.review_number {
            w.push("review_number = ?", int(n));
        }
        if let Some(s) = filter.status {
            w.push("status = ?", text(s.as_str()));
        }
        if let Some(s) = filter.status_not {
            w.push("status != ?", text(s.as_str()));
        }
        if let Some(ref r) = filter.target_release {
            w.push("osp_release = ?", text(r));
        }
        if let Some(ref n) = filter.name {
            w.push("name = ?", text(n));
        }
        if let Some(ref v) = filter.version {
            w.push("version = ?", text(v));
        }
        if let Some(t) = filter.since {
            w.push("release_date > ?", Value::Integer(t));
        }
        if let Some(t) = filter.before {
            w.push("release_date < ?", Value::Integer(t));
        }

        let sql = format!(
            "SELECT id, name, version, release_date, process_date, review_number, osp_release, status, retries
             FROM packages{} ORDER BY release_date {ord}, id {ord}",
            w.sql(),
            ord = order.sql()
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(w.values.iter()), package_from_row)?;
        let mut packages = Vec::new();
        for row in rows {
            packages.push(row??);
        }
        Ok(packages)
    }

    /// Persist a discovered package with the given initial status.
    pub fn insert_package(&self, pkg: &NewPackage, status: PackageStatus) -> Result<Package> {
        let process_date = Utc::now().timestamp();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO packages
             (name, version, release_date, process_date, review_number, osp_release, status, retries)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                pkg.name,
                pkg.version,
                pkg.release_date,
                process_date,
                pkg.review_number.map(|n| n as i64),
                pkg.target_release,
                status.as_str()
            ],
        )?;
        Ok(Package {
            id: conn.last_insert_rowid(),
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            release_date: pkg.release_date,
            process_date,
            review_number: pkg.review_number,
            target_release: pkg.target_release.clone(),
            status,
            retries: 0,
        })
    }

    /// Set `status` and refresh `process_date`.
    ///
    /// Any status other than `Retry` ends a retry streak and zeroes
    /// `retries`; use `record_retry` to count a retry outcome.
    pub fn update_status(&self, pkg: &mut Package, status: PackageStatus) -> Result<()> {
        let retries = if status == PackageStatus::Retry {
            pkg.retries
        } else {
            0
        };
        self.write_status(pkg, status, retries)
    }

    /// Mark `pkg` as `Retry` and count one more consecutive retry.
    pub fn record_retry(&self, pkg: &mut Package) -> Result<()> {
        self.write_status(pkg, PackageStatus::Retry, pkg.retries.saturating_add(1))
    }

    fn write_status(&self, pkg: &mut Package, status: PackageStatus, retries: u32) -> Result<()> {
        let process_date = Utc::now().timestamp();
        self.conn().execute(
            "UPDATE packages SET status = ?1, process_date = ?2, retries = ?3 WHERE id = ?4",
            params![status.as_str(), process_date, retries, pkg.id],
        )?;
        pkg.status = status;
        pkg.process_date = process_date;
        pkg.retries = retries;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry + migrations
// ---------------------------------------------------------------------------

fn registry() -> MutexGuard<'static, HashMap<PathBuf, Weak<StatusStore>>> {
    OPEN_STORES
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Canonical identity of a backing file, whether or not it exists yet.
fn registry_key(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            id INTEGER PRIMARY KEY,
            review INTEGER,
            commit_date INTEGER,
            process_date INTEGER,
            osp_release VARCHAR,
            status VARCHAR
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_review ON reviews(review);

        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY,
            name VARCHAR,
            version VARCHAR,
            release_date INTEGER,
            process_date INTEGER,
            review_number INTEGER,
            osp_release VARCHAR,
            status VARCHAR,
            retries INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_packages_queue ON packages(osp_release, status);
        "#,
    )?;
    Ok(())
}

// Legacy rows may carry NULLs in any non-key column.

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Review>> {
    let status: Option<String> = row.get("status")?;
    let status = match status.as_deref().unwrap_or("PROCESSED").parse() {
        Ok(s) => s,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(Review {
        id: row.get("id")?,
        review_number: row.get::<_, Option<i64>>("review")?.unwrap_or_default() as u64,
        commit_date: row.get::<_, Option<i64>>("commit_date")?.unwrap_or_default(),
        process_date: row.get::<_, Option<i64>>("process_date")?.unwrap_or_default(),
        target_release: row.get::<_, Option<String>>("osp_release")?.unwrap_or_default(),
        status,
    }))
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Package>> {
    let status: Option<String> = row.get("status")?;
    let status = match status.as_deref().unwrap_or("NEW").parse() {
        Ok(s) => s,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(Package {
        id: row.get("id")?,
        name: row.get::<_, Option<String>>("name")?.unwrap_or_default(),
        version: row.get::<_, Option<String>>("version")?.unwrap_or_default(),
        release_date: row.get::<_, Option<i64>>("release_date")?.unwrap_or_default(),
        process_date: row.get::<_, Option<i64>>("process_date")?.unwrap_or_default(),
        review_number: row.get::<_, Option<i64>>("review_number")?.map(|n| n as u64),
        target_release: row.get::<_, Option<String>>("osp_release")?.unwrap_or_default(),
        status,
        retries: row.get::<_, Option<u32>>("retries")?.unwrap_or_default(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
