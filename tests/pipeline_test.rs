mod common;

use common::{StubModel, chatsift, write_export};
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

const STUB_REPLY: &str = "Stub analysis: routine logistics, nothing of note.";

#[test]
fn run_segments_analyzes_and_summarizes_against_local_model() {
    let tmp = tempdir().expect("tempdir");
    let model = StubModel::start(STUB_REPLY);
    let export = tmp.path().join("export.txt");
    write_export(
        &export,
        &["Alice: meet at the station", "Bob: ok, 8pm", "Alice: bring the documents"],
    );
    let case = tmp.path().join("case");

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .env("CHATSIFT_LOCAL_URL", &model.url)
        .env("CHATSIFT_LOCAL_DELAY_MS", "0")
        .arg("--progress")
        .arg("off")
        .arg("run")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .arg("--max-chars")
        .arg("30")
        .assert()
        .success()
        .stdout(contains("run ok"))
        .stdout(contains("segments=3"))
        .stdout(contains("approach=flat"));

    // Three segment analyses plus one flat aggregation call.
    assert_eq!(model.generate_calls(), 4);
    for id in 1..=3 {
        let analysis = fs::read_to_string(case.join(format!("analyses/analysis_{id:03}.txt")))
            .expect("analysis text");
        assert_eq!(analysis.trim(), STUB_REPLY);
    }
    let summary =
        fs::read_to_string(case.join("reports/final_summary.md")).expect("final summary");
    assert!(summary.contains("Final forensic summary"));
    assert!(summary.contains(STUB_REPLY));
    assert!(!case.join("reports/group_summaries.md").exists());

    let prompts = model.prompts();
    let last = prompts.last().expect("aggregation prompt");
    assert!(last.contains("most severe"));
}

#[test]
fn second_analyze_reuses_stored_analyses() {
    let tmp = tempdir().expect("tempdir");
    let model = StubModel::start(STUB_REPLY);
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

    for _ in 0..2 {
        chatsift(tmp.path())
            .env("CHATSIFT_PROVIDER", "local")
            .env("CHATSIFT_LOCAL_URL", &model.url)
            .env("CHATSIFT_LOCAL_DELAY_MS", "0")
            .arg("--progress")
            .arg("off")
            .arg("analyze")
            .arg("--out")
            .arg(&case)
            .assert()
            .success();
    }
    assert_eq!(model.generate_calls(), 2);

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .env("CHATSIFT_LOCAL_URL", &model.url)
        .env("CHATSIFT_LOCAL_DELAY_MS", "0")
        .arg("--progress")
        .arg("off")
        .arg("analyze")
        .arg("--out")
        .arg(&case)
        .arg("--force")
        .assert()
        .success();
    assert_eq!(model.generate_calls(), 4);
}

#[test]
fn unreachable_local_model_fails_before_analysis() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export.txt");
    write_export(&export, &["Alice: hello"]);
    let case = tmp.path().join("case");

    chatsift(tmp.path())
        .env("CHATSIFT_PROVIDER", "local")
        .env("CHATSIFT_LOCAL_URL", "http://127.0.0.1:9")
        .arg("--progress")
        .arg("off")
        .arg("run")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .assert()
        .failure()
        .stderr(contains("local model endpoint unreachable"));
    assert!(!case.join("analyses/analysis_001.txt").exists());
}

#[test]
fn summarize_after_resegmenting_uses_only_current_analyses() {
    let tmp = tempdir().expect("tempdir");
    let model = StubModel::start(STUB_REPLY);
    let export = tmp.path().join("export.txt");
    write_export(&export, &["Alice: meet at the station", "Bob: ok", "Carol: fine"]);
    let case = tmp.path().join("case");
    let local = |cmd: &mut assert_cmd::Command| {
        cmd.env("CHATSIFT_PROVIDER", "local")
            .env("CHATSIFT_LOCAL_URL", &model.url)
            .env("CHATSIFT_LOCAL_DELAY_MS", "0")
            .arg("--progress")
            .arg("off");
    };

    let mut run = chatsift(tmp.path());
    local(&mut run);
    run.arg("run")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .arg("--max-chars")
        .arg("5")
        .assert()
        .success()
        .stdout(contains("segments=3"));
    assert_eq!(model.generate_calls(), 4);

    // Page 1 stays alone; pages 2 and 3 now share a segment.
    chatsift(tmp.path())
        .arg("segment")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .arg("--max-chars")
        .arg("20")
        .assert()
        .success()
        .stdout(contains("segments=2"));

    let mut summarize = chatsift(tmp.path());
    local(&mut summarize);
    summarize
        .arg("summarize")
        .arg("--out")
        .arg(&case)
        .assert()
        .success()
        .stdout(contains("analyses=1"))
        .stdout(contains("segments_without_analysis=1"));

    assert_eq!(model.generate_calls(), 5);
    let prompts = model.prompts();
    let last = prompts.last().expect("aggregation prompt");
    assert!(last.contains("of 2 segments"));
    assert!(last.contains("1 analyses follow"));
    let summary =
        fs::read_to_string(case.join("reports/final_summary.md")).expect("final summary");
    assert!(summary.contains("- analyses: 1/2"));
}
