mod test_support;

use serde_json::json;
use test_support::{add_student, request, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());

    let no_ws = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(
        no_ws
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = add_student(&mut stdin, &mut reader, "4", "Ana");

    let calls = vec![
        ("students.list", json!({})),
        ("setup.get", json!({})),
        ("instruments.list", json!({})),
        ("outcomes.list", json!({})),
        ("services.list", json!({})),
        (
            "grades.manual.set",
            json!({ "studentId": student_id, "period": "t1", "instrumentKey": "examen1", "value": 7 }),
        ),
        (
            "practicalExams.get",
            json!({ "studentId": student_id, "examPeriod": "t1" }),
        ),
        ("reports.periodAverages", json!({ "period": "t1" })),
        ("reports.serviceAverages", json!({ "trimester": "t1" })),
        ("reports.practicalExams", json!({ "examPeriod": "t1" })),
        ("reports.outcomes", json!({})),
        ("reports.instruments", json!({})),
        ("reports.studentSummary", json!({ "studentId": student_id })),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("smoke-{}", i);
        let _ = request_ok(&mut stdin, &mut reader, &id, method, params);
    }

    let unknown = request(&mut stdin, &mut reader, "99", "nope.method", json!({}));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );
    assert!(str_field(&unknown["error"], "message").contains("nope.method"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
