use crate::db;
use crate::ipc::helpers::{
    check_score, db_conn, optional_f64, required_period, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Sets or clears one manual instrument grade. Only keys the period table
/// declares as manual are accepted; calculated instruments are never stored.
fn grades_manual_set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let period = required_period(req, "period")?;
    let key = required_str(req, "instrumentKey")?;
    let value = check_score(optional_f64(req, "value")?, "value").map_err(|e| {
        tracing::warn!(student = %student_id, key = %key, "rejected out-of-range grade");
        e
    })?;

    let known = state
        .config
        .table(period)
        .and_then(|t| t.manual(&key))
        .is_some();
    if !known {
        return Err(HandlerErr::bad_params(format!(
            "{} is not a manual instrument of {}",
            key,
            period.as_key()
        ))
        .with_details(json!({ "instrumentKey": key, "period": period.as_key() })));
    }

    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    }

    conn.execute(
        "INSERT INTO academic_grades(student_id, period, instrument_key, value, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, period, instrument_key) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (
            &student_id,
            period.as_key(),
            &key,
            value,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    Ok(json!({
        "studentId": student_id,
        "period": period.as_key(),
        "instrumentKey": key,
        "value": value,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.manual.set" => grades_manual_set(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
