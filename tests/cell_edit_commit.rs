mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, seed_and_open, spawn_sidecar, temp_dir};

fn cell(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student: &str,
    ec: &str,
    session: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "matrix.cell",
        json!({ "studentId": student, "ecId": ec, "session": session }),
    )
}

fn params(student: &str, ec: &str, session: &str) -> serde_json::Value {
    json!({ "studentId": student, "ecId": ec, "session": session })
}

fn commit_params(student: &str, ec: &str, session: &str, input: serde_json::Value) -> serde_json::Value {
    json!({ "studentId": student, "ecId": ec, "session": session, "input": input })
}

#[test]
fn invalid_input_is_rejected_without_touching_the_grade() {
    let workspace = temp_dir("notesd-edit-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    let not_editing = request(
        &mut stdin,
        &mut reader,
        "1",
        "cells.commit",
        commit_params("s5", "ec-a1", "normal", json!("12")),
    );
    assert_eq!(error_code(&not_editing), "not_editing");

    let begun = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "cells.beginEdit",
        params("s5", "ec-a1", "normal"),
    );
    assert_eq!(begun["cell"]["phase"], "editing");
    assert_eq!(begun["cell"]["draft"], "");

    for (i, bad) in ["abc", "25", "-0.5", "1,2,3"].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "cells.commit",
            commit_params("s5", "ec-a1", "normal", json!(bad)),
        );
        assert_eq!(error_code(&resp), "invalid_grade", "input {}", bad);
    }
    let after = cell(&mut stdin, &mut reader, "3", "s5", "ec-a1", "normal");
    assert_eq!(after["phase"], "editing");
    assert_eq!(after["invalid"], true);
    assert_eq!(after["draft"], "1,2,3");
    assert!(after["value"].is_null());
    assert_eq!(after["display"], "-");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn accepted_input_is_applied_and_persisted() {
    let workspace = temp_dir("notesd-edit-commit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "1", "cells.beginEdit", params("s5", "ec-a1", "normal"));
    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "cells.commit",
        commit_params("s5", "ec-a1", "normal", json!(" 12,5 ")),
    );
    assert_eq!(committed["intent"]["value"], 12.5);
    assert_eq!(committed["intent"]["programId"], "L1-INFO");
    assert_eq!(committed["cell"]["value"], 12.5);
    assert_eq!(committed["cell"]["display"], "12.5");
    assert_eq!(committed["cell"]["phase"], "display");
    assert_eq!(committed["progress"], 20.0);

    request_ok(&mut stdin, &mut reader, "3", "matrix.reload", json!({}));
    let reloaded = cell(&mut stdin, &mut reader, "4", "s5", "ec-a1", "normal");
    assert_eq!(reloaded["value"], 12.5);

    // numbers are accepted as-is
    request_ok(&mut stdin, &mut reader, "5", "cells.beginEdit", params("s5", "ec-a2", "normal"));
    let numeric = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "cells.commit",
        commit_params("s5", "ec-a2", "normal", json!(14)),
    );
    assert_eq!(numeric["cell"]["value"], 14.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn empty_input_clears_a_retake_grade() {
    let workspace = temp_dir("notesd-edit-clear");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "1", "cells.beginEdit", params("s2", "ec-d1", "rattrapage"));
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "cells.commit",
        commit_params("s2", "ec-d1", "rattrapage", json!("9.5")),
    );
    assert_eq!(set["cell"]["value"], 9.5);

    request_ok(&mut stdin, &mut reader, "3", "cells.beginEdit", params("s2", "ec-d1", "rattrapage"));
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "cells.commit",
        commit_params("s2", "ec-d1", "rattrapage", json!("")),
    );
    assert!(cleared["cell"]["value"].is_null());
    assert_eq!(cleared["cell"]["display"], "-");

    request_ok(&mut stdin, &mut reader, "5", "matrix.reload", json!({}));
    let reloaded = cell(&mut stdin, &mut reader, "6", "s2", "ec-d1", "rattrapage");
    assert!(reloaded["value"].is_null());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn finishing_first_session_unlocks_the_retake() {
    let workspace = temp_dir("notesd-edit-unlock");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    let locked = cell(&mut stdin, &mut reader, "1", "s2", "ec-a1", "rattrapage");
    assert_eq!(locked["access"], "locked");
    assert_eq!(locked["reason"], "first_session_incomplete");

    request_ok(&mut stdin, &mut reader, "2", "cells.beginEdit", params("s2", "ec-a2", "normal"));
    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cells.commit",
        commit_params("s2", "ec-a2", "normal", json!("10")),
    );
    // normal 5/5, retake ue-a (2) and ue-d (1) now open and empty
    assert_eq!(committed["progress"], 62.5);

    let unlocked = cell(&mut stdin, &mut reader, "4", "s2", "ec-a1", "rattrapage");
    assert_eq!(unlocked["access"], "editable");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn cancel_and_bulk_edit() {
    let workspace = temp_dir("notesd-edit-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "1", "cells.beginEdit", params("s3", "ec-a1", "normal"));
    let cancelled = request_ok(&mut stdin, &mut reader, "2", "cells.cancel", params("s3", "ec-a1", "normal"));
    assert_eq!(cancelled["cell"]["phase"], "display");
    assert_eq!(cancelled["cell"]["value"], 5.0);

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cells.bulkEdit",
        json!({ "ecId": "ec-b1", "enabled": true }),
    );
    assert_eq!(bulk["bulkEdit"], json!(["ec-b1"]));

    let open = cell(&mut stdin, &mut reader, "4", "s5", "ec-b1", "normal");
    assert_eq!(open["phase"], "editing");
    assert_eq!(open["bulk"], true);
    let locked = cell(&mut stdin, &mut reader, "5", "s4", "ec-b1", "rattrapage");
    assert_eq!(locked["phase"], "display");
    assert_eq!(locked["access"], "locked");

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "cells.commit",
        commit_params("s5", "ec-b1", "normal", json!("7")),
    );
    assert_eq!(committed["cell"]["value"], 7.0);

    let unknown = request(
        &mut stdin,
        &mut reader,
        "7",
        "cells.bulkEdit",
        json!({ "ecId": "ec-zz", "enabled": true }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "cells.bulkEdit",
        json!({ "ecId": "ec-b1", "enabled": false }),
    );
    let closed = cell(&mut stdin, &mut reader, "9", "s3", "ec-b1", "normal");
    assert_eq!(closed["phase"], "display");

    drop(stdin);
    let _ = child.wait();
}
