use crate::calc::{practical_exam, ExamCells, Grade};
use crate::db;
use crate::ipc::helpers::{
    check_score, db_conn, grade_json, load_sources, required_period, required_str, respond,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn ensure_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))),
    }
}

fn groups_json(cells: &ExamCells) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = practical_exam::group_results(cells)
        .into_iter()
        .map(|g| {
            json!({
                "key": g.key,
                "weight": g.weight,
                "grade": grade_json(&g.grade),
            })
        })
        .collect();
    json!(groups)
}

fn practical_exams_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let exam_period = required_period(req, "examPeriod")?;
    ensure_student(conn, &student_id)?;

    let sources = load_sources(conn)?;
    let exam = sources.practical_exam(&student_id, exam_period);
    let cells = exam.map(|e| e.cells.clone()).unwrap_or_default();
    let stored = practical_exam::stored_score(&sources, &student_id, exam_period);

    Ok(json!({
        "studentId": student_id,
        "examPeriod": exam_period.as_key(),
        "saved": exam.is_some(),
        "cells": cells,
        "groups": groups_json(&cells),
        "finalScore": stored.rounded(),
    }))
}

/// Rejects cells outside the rubric and scores outside [0, 10].
fn validate_cells(cells: &ExamCells) -> Result<(), HandlerErr> {
    for (group_key, criteria) in cells {
        let Some(group) = practical_exam::rubric_group(group_key) else {
            return Err(HandlerErr::bad_params(format!("unknown outcome group {}", group_key))
                .with_details(json!({ "group": group_key })));
        };
        for (criterion_key, cell) in criteria {
            if !group.criteria.contains(&criterion_key.as_str()) {
                return Err(HandlerErr::bad_params(format!(
                    "{} has no criterion {}",
                    group.label, criterion_key
                ))
                .with_details(json!({ "group": group_key, "criterion": criterion_key })));
            }
            check_score(cell.score, &format!("{}.{}", group_key, criterion_key))?;
        }
    }
    Ok(())
}

/// Stores the cells together with the final score computed now. The stored
/// score is what every report reads from then on.
fn practical_exams_save(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let exam_period = required_period(req, "examPeriod")?;
    let cells: ExamCells =
        serde_json::from_value(req.params.get("cells").cloned().unwrap_or_else(|| json!({})))
            .map_err(|e| HandlerErr::bad_params(format!("invalid cells: {}", e)))?;
    validate_cells(&cells)?;
    ensure_student(conn, &student_id)?;

    let final_score: Grade = practical_exam::final_score(&cells);
    let cells_json =
        serde_json::to_string(&cells).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    conn.execute(
        "INSERT INTO practical_exams(student_id, exam_period, cells_json, final_score, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, exam_period) DO UPDATE SET
           cells_json = excluded.cells_json,
           final_score = excluded.final_score,
           updated_at = excluded.updated_at",
        (
            &student_id,
            exam_period.as_key(),
            cells_json,
            final_score.rounded(),
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    tracing::info!(
        student = %student_id,
        period = exam_period.as_key(),
        final_score = ?final_score.rounded(),
        "practical exam saved"
    );
    Ok(json!({
        "studentId": student_id,
        "examPeriod": exam_period.as_key(),
        "groups": groups_json(&cells),
        "finalScore": final_score.rounded(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "practicalExams.get" => practical_exams_get(state, req),
        "practicalExams.save" => practical_exams_save(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
