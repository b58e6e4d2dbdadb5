use crate::calc::{
    service_day, GroupServiceScore, IndividualServiceScore, Period, Service, ServiceEvaluation,
};
use crate::db;
use crate::ipc::helpers::{
    db_conn, grade_json, load_sources, next_sort_order, optional_str, required_period,
    required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

fn required_trimester(req: &Request, key: &str) -> Result<Period, HandlerErr> {
    let period = required_period(req, key)?;
    if period == Period::Remediation {
        return Err(HandlerErr::bad_params("services belong to t1, t2 or t3")
            .with_details(json!({ key: period.as_key() })));
    }
    Ok(period)
}

fn find_service(conn: &Connection, service_id: &str) -> Result<Service, HandlerErr> {
    registry::load_services(conn)
        .map_err(|e| HandlerErr::db("db_query_failed", format!("{e:#}")))?
        .into_iter()
        .find(|s| s.id == service_id)
        .ok_or_else(|| {
            HandlerErr::new("not_found", "service not found")
                .with_details(json!({ "serviceId": service_id }))
        })
}

fn services_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let trimester = match req.params.get("trimester") {
        Some(v) if !v.is_null() => Some(required_trimester(req, "trimester")?),
        _ => None,
    };
    let services: Vec<Service> = registry::load_services(conn)
        .map_err(|e| HandlerErr::db("db_query_failed", format!("{e:#}")))?
        .into_iter()
        .filter(|s| trimester.map_or(true, |t| s.trimester == t))
        .collect();
    Ok(json!({ "services": services }))
}

fn services_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let trimester = required_trimester(req, "trimester")?;
    let date = optional_str(req, "date");
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = next_sort_order(conn, "services")?;

    conn.execute(
        "INSERT INTO services(id, name, trimester, date, locked, sort_order)
         VALUES(?, ?, ?, ?, 0, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           trimester = excluded.trimester,
           date = excluded.date",
        (&id, &name, trimester.as_key(), &date, sort_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({ "serviceId": id }))
}

fn services_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(req, "id")?;
    let changed = conn
        .execute("DELETE FROM services WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "service not found")
            .with_details(json!({ "id": id })));
    }
    tracing::info!(service = %id, "service deleted");
    Ok(json!({ "deleted": true }))
}

fn services_lock(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let service_id = required_str(req, "serviceId")?;
    let locked = req
        .params
        .get("locked")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("locked must be a boolean"))?;
    let changed = conn
        .execute(
            "UPDATE services SET locked = ? WHERE id = ?",
            (locked as i64, &service_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "service not found")
            .with_details(json!({ "serviceId": service_id })));
    }
    tracing::info!(service = %service_id, locked, "service lock changed");
    Ok(json!({ "serviceId": service_id, "locked": locked }))
}

fn services_evaluation_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let service_id = required_str(req, "serviceId")?;
    let service = find_service(conn, &service_id)?;
    let sources = load_sources(conn)?;
    let evaluation = sources
        .service_evaluation(&service_id)
        .cloned()
        .unwrap_or_else(|| ServiceEvaluation {
            service_id: service_id.clone(),
            ..ServiceEvaluation::default()
        });

    let rows: Vec<serde_json::Value> = sources
        .students
        .iter()
        .map(|s| {
            let b = service_day::service_breakdown(&evaluation, &s.id);
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "breakdown": b,
                "grade": grade_json(&b.grade),
            })
        })
        .collect();

    Ok(json!({
        "service": service,
        "evaluation": evaluation,
        "rows": rows,
    }))
}

fn check_slots(
    scores: &[Option<f64>],
    maxima: &[f64],
    field: &str,
) -> Result<(), HandlerErr> {
    if scores.len() > maxima.len() {
        return Err(HandlerErr::bad_params(format!(
            "{} has {} slots, at most {} allowed",
            field,
            scores.len(),
            maxima.len()
        )));
    }
    for (slot, (score, max)) in scores.iter().zip(maxima).enumerate() {
        if let Some(v) = score {
            if !v.is_finite() || *v < 0.0 || v > max {
                return Err(HandlerErr::bad_params(format!(
                    "{} slot {} must be between 0 and {}",
                    field, slot, max
                ))
                .with_details(json!({ "field": field, "slot": slot, "value": v })));
            }
        }
    }
    Ok(())
}

fn parse_evaluation(req: &Request) -> Result<(BTreeMap<String, IndividualServiceScore>, Vec<GroupServiceScore>), HandlerErr> {
    let individual: BTreeMap<String, IndividualServiceScore> = serde_json::from_value(
        req.params.get("individual").cloned().unwrap_or_else(|| json!({})),
    )
    .map_err(|e| HandlerErr::bad_params(format!("invalid individual scores: {}", e)))?;
    let groups: Vec<GroupServiceScore> =
        serde_json::from_value(req.params.get("groups").cloned().unwrap_or_else(|| json!([])))
            .map_err(|e| HandlerErr::bad_params(format!("invalid group scores: {}", e)))?;

    for (student_id, record) in &individual {
        check_slots(
            &record.scores,
            &service_day::INDIVIDUAL_SLOT_MAX,
            &format!("individual[{}]", student_id),
        )?;
    }
    let mut seen = BTreeSet::new();
    for group in &groups {
        check_slots(
            &group.scores,
            &service_day::GROUP_SLOT_MAX,
            &format!("groups[{}]", group.group_id),
        )?;
        for member in &group.members {
            if !seen.insert(member.as_str()) {
                return Err(HandlerErr::bad_params("a student can only be in one group")
                    .with_details(json!({ "studentId": member })));
            }
        }
    }
    Ok((individual, groups))
}

fn services_evaluation_save(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let service_id = required_str(req, "serviceId")?;
    let service = find_service(conn, &service_id)?;
    if service.locked {
        tracing::warn!(service = %service_id, "rejected edit of locked service");
        return Err(HandlerErr::new("locked", "service evaluation is locked")
            .with_details(json!({ "serviceId": service_id })));
    }
    let (individual, groups) = parse_evaluation(req)?;

    let individual_json = serde_json::to_string(&individual)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let groups_json =
        serde_json::to_string(&groups).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    conn.execute(
        "INSERT INTO service_evaluations(service_id, individual_json, groups_json, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(service_id) DO UPDATE SET
           individual_json = excluded.individual_json,
           groups_json = excluded.groups_json,
           updated_at = excluded.updated_at",
        (&service_id, individual_json, groups_json, db::now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let saved: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM service_evaluations WHERE service_id = ?",
            [&service_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    tracing::info!(service = %service_id, students = individual.len(), groups = groups.len(), "service evaluation saved");
    Ok(json!({ "serviceId": service_id, "updatedAt": saved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "services.list" => services_list(state, req),
        "services.upsert" => services_upsert(state, req),
        "services.delete" => services_delete(state, req),
        "services.lock" => services_lock(state, req),
        "services.evaluation.get" => services_evaluation_get(state, req),
        "services.evaluation.save" => services_evaluation_save(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
