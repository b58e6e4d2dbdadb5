use crate::db;
use crate::ipc::helpers::{db_conn, next_sort_order, optional_str, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use serde_json::json;
use uuid::Uuid;

fn students_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let students =
        registry::load_students(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let display_name = required_str(req, "displayName")?;
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = match req.params.get("sortOrder").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => next_sort_order(conn, "students")?,
    };

    conn.execute(
        "INSERT INTO students(id, display_name, sort_order, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           sort_order = CASE WHEN ? THEN excluded.sort_order ELSE students.sort_order END,
           updated_at = excluded.updated_at",
        (
            &id,
            &display_name,
            sort_order,
            db::now_rfc3339(),
            req.params.get("sortOrder").is_some(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({ "studentId": id }))
}

/// Removing a student drops their manual grades and practical exams with
/// them. Service evaluations keep the record; reports only walk the roster.
fn students_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(req, "id")?;
    let changed = conn
        .execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "id": id })));
    }
    tracing::info!(student = %id, "student deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state),
        "students.upsert" => students_upsert(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
