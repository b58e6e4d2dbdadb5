mod test_support;

use serde_json::json;
use std::fs::File;
use std::io::Read;
use test_support::{add_student, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn workspace_bundle_export_and_import_roundtrip() {
    let workspace = temp_dir("gradebook-backup-src");
    let workspace2 = temp_dir("gradebook-backup-dst");
    let out_dir = temp_dir("gradebook-backup-out");
    let bundle_path = out_dir.join("workspace.gradebook.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ana = add_student(&mut stdin, &mut reader, "2", "Ana");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.manual.set",
        json!({ "studentId": ana, "period": "t3", "instrumentKey": "examen3", "value": 7.25 }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"].as_str(), Some("gradebook-workspace-v1"));
    assert_eq!(export["entryCount"].as_u64(), Some(2));
    let sha = str_field(&export, "dbSha256");
    assert_eq!(sha.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(&sha));
    archive
        .by_name("db/gradebook.sqlite3")
        .expect("database entry in bundle");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace2.to_string_lossy() }),
    );
    let import = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(import["dbSha256"].as_str(), Some(sha.as_str()));

    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(students["students"][0]["id"].as_str(), Some(ana.as_str()));
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.periodAverages",
        json!({ "period": "t3" }),
    );
    assert_eq!(report["rows"][0]["average"]["value"].as_f64(), Some(7.25));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "backup.importWorkspaceBundle",
        json!({ "inPath": out_dir.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}
