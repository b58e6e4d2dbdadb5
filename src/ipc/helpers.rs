use crate::calc::{self, Grade, GradeSources, Period};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::registry;
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn required_period(req: &Request, key: &str) -> Result<Period, HandlerErr> {
    let raw = required_str(req, key)?;
    Period::from_key(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be one of: t1, t2, t3, recuperacion", key))
            .with_details(json!({ key: raw }))
    })
}

/// Edit-boundary range check for raw scores. `None` clears a score.
pub fn check_score(value: Option<f64>, field: &str) -> Result<Option<f64>, HandlerErr> {
    match value {
        Some(v) if !calc::is_valid_score(v) => Err(HandlerErr::bad_params(format!(
            "{} must be between {} and {}",
            field,
            calc::MIN_SCORE,
            calc::MAX_SCORE
        ))
        .with_details(json!({ "field": field, "value": v }))),
        other => Ok(other),
    }
}

pub fn load_sources(conn: &Connection) -> Result<GradeSources, HandlerErr> {
    registry::load_sources(conn).map_err(|e| HandlerErr::db("db_query_failed", format!("{e:#}")))
}

/// Next sort_order at the end of `table`. Table names are internal constants.
pub fn next_sort_order(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        &format!("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM {}", table),
        [],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Grade as sent to the presentation layer: rounded value or null, plus the
/// weight that produced it.
pub fn grade_json(grade: &Grade) -> serde_json::Value {
    json!({
        "value": grade.rounded(),
        "coverage": calc::numeric::round(grade.coverage(), calc::DISPLAY_DECIMALS),
    })
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => crate::ipc::error::ok(id, v),
        Err(e) => e.response(id),
    }
}
