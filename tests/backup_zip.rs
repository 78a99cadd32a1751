mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request, request_ok, seed_and_open, spawn_sidecar, temp_dir};

fn set_grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    input: &str,
) {
    let cell = json!({ "studentId": "s5", "ecId": "ec-a1", "session": "normal" });
    request_ok(stdin, reader, &format!("{}-begin", id), "cells.beginEdit", cell.clone());
    let mut params = cell;
    params["input"] = json!(input);
    request_ok(stdin, reader, &format!("{}-commit", id), "cells.commit", params);
}

fn open(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) {
    request_ok(
        stdin,
        reader,
        id,
        "matrix.open",
        json!({ "year": "2024-2025", "programId": "L1-INFO", "semesterId": "S1" }),
    );
}

#[test]
fn bundle_export_then_import_restores_grades() {
    let workspace = temp_dir("notesd-backup");
    let bundle = temp_dir("notesd-backup-out").join("notes.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_and_open(&mut stdin, &mut reader, &workspace);
    set_grade(&mut stdin, &mut reader, "1", "12");

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], "notesd-workspace-v1");
    assert_eq!(exported["entryCount"], 2);
    let sha = exported["dbSha256"].as_str().expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(bundle.is_file());

    set_grade(&mut stdin, &mut reader, "3", "3");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormatDetected"], "notesd-workspace-v1");
    assert_eq!(imported["dbSha256"], sha);

    // the open grid belonged to the replaced database
    let health = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(health["matrix"], "empty");

    open(&mut stdin, &mut reader, "6");
    let cell = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "matrix.cell",
        json!({ "studentId": "s5", "ecId": "ec-a1", "session": "normal" }),
    );
    assert_eq!(cell["value"], 12.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bad_bundles_leave_the_workspace_usable() {
    let workspace = temp_dir("notesd-backup-bad");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let early = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": workspace.join("x.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    seed_and_open(&mut stdin, &mut reader, &workspace);

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "backup.importWorkspaceBundle",
        json!({ "inPath": workspace.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let junk = workspace.join("junk.zip");
    std::fs::write(&junk, b"this is not a zip").expect("write junk");
    let rejected = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "io_failed");

    let no_path = request(&mut stdin, &mut reader, "4", "backup.exportWorkspaceBundle", json!({}));
    assert_eq!(error_code(&no_path), "bad_params");

    open(&mut stdin, &mut reader, "5");
    let cell = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "matrix.cell",
        json!({ "studentId": "s1", "ecId": "ec-a1", "session": "normal" }),
    );
    assert_eq!(cell["value"], 12.0);

    drop(stdin);
    let _ = child.wait();
}
