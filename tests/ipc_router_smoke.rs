mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_ok, seed_and_open, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("notesd-router-smoke");
    let bundle_out = workspace.join("smoke.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "0", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["sessions"][1]["key"], "rattrapage");
    assert_eq!(health["matrix"], "empty");

    for (i, (method, params)) in [
        ("setup.get", json!({})),
        ("structure.import", json!({})),
        ("students.profile", json!({ "studentId": "s1" })),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(&mut stdin, &mut reader, &format!("pre-{}", i), method, params);
        assert_eq!(error_code(&resp), "no_workspace", "{}", method);
    }
    let resp = request(&mut stdin, &mut reader, "pre-view", "matrix.view", json!({}));
    assert_eq!(error_code(&resp), "no_matrix");

    seed_and_open(&mut stdin, &mut reader, &workspace);
    let cell = json!({ "studentId": "s5", "ecId": "ec-c1", "session": "normal" });
    let calls = vec![
        ("health", json!({})),
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "grid", "patch": {} })),
        ("results.upsert", json!({ "structureId": "st-l1-s1" })),
        ("matrix.reload", json!({})),
        ("matrix.sessions.set", json!({ "sessions": ["normal", "rattrapage"] })),
        ("matrix.view", json!({})),
        ("matrix.cell", cell.clone()),
        ("cells.beginEdit", cell.clone()),
        ("cells.cancel", cell.clone()),
        ("cells.bulkEdit", json!({ "ecId": "ec-c1", "enabled": false })),
        ("stats.column", json!({ "column": "MOY-normal" })),
        ("columns.order", json!({})),
        ("columns.reorder", json!({ "sourceId": "ue-a", "targetId": "ue-a" })),
        ("students.profile", json!({ "studentId": "s1" })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
        ("backup.importWorkspaceBundle", json!({ "inPath": bundle_out.to_string_lossy() })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        request_ok(&mut stdin, &mut reader, &format!("call-{}", i), method, params);
    }

    let commit = request(
        &mut stdin,
        &mut reader,
        "commit",
        "cells.commit",
        json!({ "studentId": "s5", "ecId": "ec-c1", "session": "normal", "input": "10" }),
    );
    assert_ne!(error_code(&commit), "not_implemented");

    let unknown = request(&mut stdin, &mut reader, "unknown", "classes.list", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write junk");
    stdin.flush().expect("flush junk");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_json");

    // the loop keeps serving after a bad line
    request_ok(&mut stdin, &mut reader, "after", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
