mod test_support;

use serde_json::json;
use test_support::{
    error_code, fixture_path, request, request_ok, seed_and_open, spawn_sidecar, temp_dir,
};

#[test]
fn failed_save_reloads_the_stored_grid() {
    let workspace = temp_dir("notesd-commit-failure");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    // Another writer renames ec-d1 while the grid is still on screen.
    let text = std::fs::read_to_string(fixture_path("l1_s1.json")).expect("read fixture");
    let renamed: serde_json::Value =
        serde_json::from_str(&text.replace("ec-d1", "ec-d2")).expect("fixture json");
    request_ok(&mut stdin, &mut reader, "1", "structure.import", renamed);

    let stale = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "cells.beginEdit",
        json!({ "studentId": "s1", "ecId": "ec-d1", "session": "normal" }),
    );
    assert_eq!(stale["cell"]["value"], 10.0);

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "cells.commit",
        json!({ "studentId": "s1", "ecId": "ec-d1", "session": "normal", "input": "13" }),
    );
    assert_eq!(error_code(&failed), "commit_failed");
    let details = &failed["error"]["details"];
    assert_eq!(details["reloaded"], true);
    assert_eq!(details["warning"], "save failed, reloaded");

    let gone = request(
        &mut stdin,
        &mut reader,
        "4",
        "matrix.cell",
        json!({ "studentId": "s1", "ecId": "ec-d1", "session": "normal" }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "matrix.cell",
        json!({ "studentId": "s1", "ecId": "ec-d2", "session": "normal" }),
    );
    assert_eq!(fresh["value"], 10.0);
    assert_eq!(fresh["phase"], "display");

    let summary = request_ok(&mut stdin, &mut reader, "6", "columns.order", json!({}));
    let ecs = &summary["columns"][3]["ecs"];
    assert_eq!(ecs[0]["id"], "ec-d2");

    drop(stdin);
    let _ = child.wait();
}
