mod common;

use common::{chatsift, write_export};
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const BOB_HEADER: &str = "Start Time: 03/05/2023 10:12:00\n\
Last Activity: 04/05/2023 18:40:00\n\
Participants:\n\
+39 333 444 5555 Alice (owner)\n\
+39 333 777 8888 Bob\n\
\n\
Identifier: 4f1a9c2e7b3d5a60\n\
Number of attachments: 2\n\
Bob: are we still meeting?";

const CAROL_HEADER: &str = "Start Time: 07/05/2023 09:00:00\n\
Participants:\n\
+39 333 444 5555 Alice (owner)\n\
+39 333 999 0000 Carol\n\
\n\
Identifier: 9b8c7d6e5f4a3b21\n\
Carol: call me back";

fn segment_export(dir: &Path, pages: &[&str]) -> std::path::PathBuf {
    let export = dir.join("export.txt");
    write_export(&export, pages);
    let case = dir.join("case");
    chatsift(dir)
        .arg("segment")
        .arg("--input")
        .arg(&export)
        .arg("--out")
        .arg(&case)
        .arg("--max-chars")
        .arg("10")
        .assert()
        .success();
    case
}

#[test]
fn pattern_detection_builds_chat_index_without_a_model() {
    let tmp = tempdir().expect("tempdir");
    let case = segment_export(
        tmp.path(),
        &[
            BOB_HEADER,
            "Alice: yes, 8pm",
            CAROL_HEADER,
            "Carol: ok",
            "Alice: see you",
        ],
    );

    chatsift(tmp.path())
        .arg("--progress")
        .arg("off")
        .arg("chats")
        .arg("--out")
        .arg(&case)
        .arg("--strategy")
        .arg("pattern")
        .arg("--detect-only")
        .assert()
        .success()
        .stdout(contains("chats=2"))
        .stdout(contains("chat_001 kind=one-to-one segments=2"))
        .stdout(contains("name=Bob"))
        .stdout(contains("chat_002 kind=one-to-one segments=3"))
        .stdout(contains("name=Carol"));

    let raw = fs::read_to_string(case.join("reports/chats.json")).expect("chat index");
    let index: serde_json::Value = serde_json::from_str(&raw).expect("chat index json");
    assert_eq!(index["strategy"], "pattern");
    assert_eq!(index["total_chats"], 2);
    assert_eq!(index["chats"][0]["identifier"], "4f1a9c2e7b3d5a60");
    assert_eq!(index["chats"][0]["segment_ids"], serde_json::json!([1, 2]));
    assert_eq!(index["chats"][0]["confidence"], "high");
    assert_eq!(index["chats"][1]["segment_ids"], serde_json::json!([3, 4, 5]));
}

#[test]
fn repeated_headers_for_the_same_chat_are_merged() {
    let tmp = tempdir().expect("tempdir");
    let case = segment_export(tmp.path(), &[BOB_HEADER, "Alice: later", BOB_HEADER]);

    chatsift(tmp.path())
        .arg("--progress")
        .arg("off")
        .arg("chats")
        .arg("--out")
        .arg(&case)
        .arg("--detect-only")
        .assert()
        .success()
        .stdout(contains("chats=1"))
        .stdout(contains("candidates=2"))
        .stdout(contains("chat_001 kind=one-to-one segments=3"));
}
