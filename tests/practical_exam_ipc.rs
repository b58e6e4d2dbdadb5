mod test_support;

use serde_json::json;
use test_support::{add_student, assert_close, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn saving_an_exam_persists_the_final_score() {
    let workspace = temp_dir("gradebook-practical-exam");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ana = add_student(&mut stdin, &mut reader, "2", "Ana");
    let bruno = add_student(&mut stdin, &mut reader, "3", "Bruno");

    // ra1 mean 8, ra2 mean 6.5, ra3 mean 7, ra4 unscored:
    // (8*20 + 6.5*30 + 7*30) / 80 = 7.0625
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "practicalExams.save",
        json!({
            "studentId": ana,
            "examPeriod": "t2",
            "cells": {
                "ra1": { "a": { "score": 8 }, "b": { "score": 8 }, "c": { "score": null } },
                "ra2": { "a": { "score": 5 }, "b": { "score": 8 } },
                "ra3": { "d": { "score": 10, "note": "excelente emplatado" }, "a": { "score": 5 }, "b": { "score": 8 }, "c": { "score": 5 } }
            }
        }),
    );
    assert_close(saved.get("finalScore").and_then(|v| v.as_f64()), 7.06);
    let groups = saved.get("groups").and_then(|v| v.as_array()).expect("groups");
    assert_eq!(groups.len(), 4);
    assert!(groups[3]["grade"]["value"].is_null());

    // Nothing scored at all is absent, never 0.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "practicalExams.save",
        json!({ "studentId": bruno, "examPeriod": "t2", "cells": { "ra1": { "a": { "score": null } } } }),
    );
    assert!(empty.get("finalScore").expect("finalScore").is_null());

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "practicalExams.save",
        json!({ "studentId": ana, "examPeriod": "t2", "cells": { "ra4": { "d": { "score": 5 } } } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "practicalExams.save",
        json!({ "studentId": ana, "examPeriod": "t2", "cells": { "ra1": { "a": { "score": 12 } } } }),
    );
    assert_eq!(code, "bad_params");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "practicalExams.get",
        json!({ "studentId": ana, "examPeriod": "t2" }),
    );
    assert_eq!(fetched.get("saved").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        fetched["cells"]["ra3"]["d"]["note"].as_str(),
        Some("excelente emplatado")
    );
    assert_close(fetched.get("finalScore").and_then(|v| v.as_f64()), 7.06);

    // The exam feeds the t2 period through exPracticoT2.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.periodAverages",
        json!({ "period": "t2" }),
    );
    let ana_row = report["rows"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["studentId"].as_str() == Some(ana.as_str())))
        .expect("ana row");
    assert_close(ana_row["average"]["value"].as_f64(), 7.06);

    drop(stdin);
    let _ = child.wait();

    let conn = rusqlite::Connection::open(workspace.join("gradebook.sqlite3")).expect("open db");
    let stored: Option<f64> = conn
        .query_row(
            "SELECT final_score FROM practical_exams WHERE student_id = ? AND exam_period = 't2'",
            [&ana],
            |r| r.get(0),
        )
        .expect("exam row");
    assert_close(stored, 7.06);
    let empty_stored: Option<f64> = conn
        .query_row(
            "SELECT final_score FROM practical_exams WHERE student_id = ? AND exam_period = 't2'",
            [&bruno],
            |r| r.get(0),
        )
        .expect("empty exam row");
    assert_eq!(empty_stored, None);

    let _ = std::fs::remove_dir_all(workspace);
}
