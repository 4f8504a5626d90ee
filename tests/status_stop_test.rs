mod common;

use common::{chatsift, write_export};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn status_reports_provider_and_case_state() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export.txt");
    write_export(&export, &["Alice: hello", "Bob: hi"]);
    let case = tmp.path().join("case");
    chatsift(tmp.path())
        .arg("segment")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .arg("--max-chars")
        .arg("5")
        .assert()
        .success();

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .env("CHATSIFT_HIERARCHICAL_THRESHOLD", "12")
        .arg("status")
        .arg("--out")
        .arg(&case)
        .assert()
        .success()
        .stdout(contains("config_source=defaults"))
        .stdout(contains("provider=local"))
        .stdout(contains("hierarchical_threshold=12"))
        .stdout(contains("segments=2"))
        .stdout(contains("analyses=0"))
        .stdout(contains("stop_requested=false"));
}

#[test]
fn status_flags_misspelled_environment_keys() {
    let tmp = tempdir().expect("tempdir");

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .env("CHATSIFT_PROVIDR", "openai")
        .arg("status")
        .assert()
        .failure()
        .stdout(contains("issue: unknown environment variable CHATSIFT_PROVIDR"))
        .stdout(contains("CHATSIFT_PROVIDER ").not());
}

#[test]
fn status_reports_missing_api_key_as_issue() {
    let tmp = tempdir().expect("tempdir");

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "anthropic")
        .arg("status")
        .assert()
        .failure()
        .stdout(contains("ANTHROPIC_API_KEY"));
}

#[test]
fn stop_writes_request_visible_to_status() {
    let tmp = tempdir().expect("tempdir");
    let case = tmp.path().join("case");
    std::fs::create_dir_all(&case).expect("mkdir case");

    chatsift(tmp.path())
        .arg("stop")
        .arg("--out")
        .arg(&case)
        .assert()
        .success()
        .stdout(contains("already_requested=false"));
    assert!(case.join("STOP").exists());

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .arg("status")
        .arg("--out")
        .arg(&case)
        .assert()
        .success()
        .stdout(contains("stop_requested=true"));
}

#[test]
fn stop_on_missing_case_is_reported() {
    let tmp = tempdir().expect("tempdir");

    chatsift(tmp.path())
        .arg("stop")
        .arg("--out")
        .arg(tmp.path().join("nowhere"))
        .assert()
        .failure()
        .stdout(contains("does not exist"));
}
