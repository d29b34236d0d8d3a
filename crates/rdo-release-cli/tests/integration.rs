#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use rdo_release_core::{
    paths,
    record::NewPackage,
    store::StatusStore,
    types::PackageStatus,
};
use tempfile::TempDir;

fn rdo_release(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rdo-release").unwrap();
    cmd.current_dir(dir.path())
        .env("RDO_RELEASE_DIR", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn seed_package(dir: &TempDir, name: &str, release: &str, status: PackageStatus) {
    paths::ensure_layout(dir.path()).unwrap();
    let store = StatusStore::open(&paths::db_path(dir.path())).unwrap();
    let pkg = NewPackage::new(name, "1.2.3", release, 1_569_931_200, Some(685_123));
    store.insert_package(&pkg, status).unwrap();
}

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("new-releases"));
}

#[test]
fn run_requires_a_release() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--release"));
}

#[test]
fn unknown_tarball_policy_is_rejected() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .args(["run", "-r", "train", "--tarball-policy", "sometimes"])
        .assert()
        .failure();
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .args(["--config", "nope.yaml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

// ---------------------------------------------------------------------------
// status / reviews
// ---------------------------------------------------------------------------

#[test]
fn status_on_empty_base_creates_layout() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No packages."));

    assert!(dir.path().join("data/distgits").is_dir());
    assert!(dir.path().join("logs").is_dir());
    assert!(dir.path().join("data/reviews.sqlite").exists());
}

#[test]
fn empty_json_listings() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .args(["--json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
    rdo_release(&dir)
        .args(["reviews", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn status_filters_by_release_and_status() {
    let dir = TempDir::new().unwrap();
    seed_package(&dir, "python-oslo-config", "train", PackageStatus::New);
    seed_package(&dir, "python-nova", "stein", PackageStatus::NotBranched);

    rdo_release(&dir)
        .args(["status", "--json", "--release", "train"])
        .assert()
        .success()
        .stdout(predicate::str::contains("python-oslo-config"))
        .stdout(predicate::str::contains("\"NEW\""))
        .stdout(predicate::str::contains("python-nova").not());

    rdo_release(&dir)
        .args(["status", "--status", "notbranched"])
        .assert()
        .success()
        .stdout(predicate::str::contains("python-nova"))
        .stdout(predicate::str::contains("NOTBRANCHED"))
        .stdout(predicate::str::contains("python-oslo-config").not());
}

#[test]
fn status_rejects_unknown_status() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir)
        .args(["status", "--status", "bogus"])
        .assert()
        .failure();
}

#[test]
fn read_only_commands_do_not_write_logs() {
    let dir = TempDir::new().unwrap();
    rdo_release(&dir).arg("reviews").assert().success();
    let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .collect();
    assert!(logs.is_empty());
}
