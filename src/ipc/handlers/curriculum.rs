//! Course definitions: instruments with their activities, learning outcomes
//! with their criteria, and criterion-to-activity associations.

use crate::calc::{ActivitySource, CriterionAssociation, Period};
use crate::ipc::helpers::{
    db_conn, load_sources, next_sort_order, optional_f64, optional_str, required_period,
    required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn weight_param(req: &Request) -> Result<f64, HandlerErr> {
    let weight = optional_f64(req, "weight")?.unwrap_or(0.0);
    if !weight.is_finite() || weight < 0.0 {
        return Err(HandlerErr::bad_params("weight must be a non-negative number")
            .with_details(json!({ "weight": weight })));
    }
    Ok(weight)
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?", table),
        [id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn delete_by_id(conn: &Connection, table: &str, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(req, "id")?;
    let changed = conn
        .execute(&format!("DELETE FROM {} WHERE id = ?", table), [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", format!("{} row not found", table))
            .with_details(json!({ "id": id })));
    }
    Ok(json!({ "deleted": true }))
}

fn instruments_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sources = load_sources(conn)?;
    let instruments: Vec<serde_json::Value> = sources
        .instruments
        .iter()
        .map(|i| {
            let activities: Vec<_> = sources
                .activities
                .iter()
                .filter(|a| a.instrument_id == i.id)
                .collect();
            json!({
                "id": i.id,
                "name": i.name,
                "weight": i.weight,
                "sortOrder": i.sort_order,
                "activities": activities,
            })
        })
        .collect();
    let weight_sum: f64 = sources.instruments.iter().map(|i| i.weight).sum();
    Ok(json!({
        "instruments": instruments,
        "weightSum": weight_sum,
        "weightDiscrepancy": weight_sum - 100.0,
    }))
}

fn instruments_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let weight = weight_param(req)?;
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = next_sort_order(conn, "instruments")?;

    conn.execute(
        "INSERT INTO instruments(id, name, weight, sort_order) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, weight = excluded.weight",
        (&id, &name, weight, sort_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({ "instrumentId": id }))
}

fn parse_activity_source(req: &Request) -> Result<ActivitySource, HandlerErr> {
    let Some(raw) = req.params.get("source") else {
        return Err(HandlerErr::bad_params("missing source"));
    };
    let source: ActivitySource = serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::bad_params(format!(
            "source must be {{kind: manual|serviceAverage|practicalExam}}: {}",
            e
        ))
    })?;
    if let ActivitySource::Manual { instrument_key } = &source {
        if instrument_key.trim().is_empty() {
            return Err(HandlerErr::bad_params("manual source needs an instrumentKey"));
        }
    }
    Ok(source)
}

/// A manual source must name a manual instrument of the activity's period,
/// and a service average needs a trimester.
fn check_activity_source(
    state: &AppState,
    period: Period,
    source: &ActivitySource,
) -> Result<(), HandlerErr> {
    match source {
        ActivitySource::Manual { instrument_key } => {
            let known = state
                .config
                .table(period)
                .and_then(|t| t.manual(instrument_key))
                .is_some();
            if !known {
                return Err(HandlerErr::bad_params(format!(
                    "{} is not a manual instrument of {}",
                    instrument_key,
                    period.as_key()
                ))
                .with_details(json!({ "instrumentKey": instrument_key, "period": period.as_key() })));
            }
        }
        ActivitySource::ServiceAverage if period == Period::Remediation => {
            return Err(HandlerErr::bad_params("services only run in t1, t2 or t3")
                .with_details(json!({ "period": period.as_key() })));
        }
        ActivitySource::ServiceAverage | ActivitySource::PracticalExam => {}
    }
    Ok(())
}

fn activities_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let instrument_id = required_str(req, "instrumentId")?;
    let name = required_str(req, "name")?;
    let period = required_period(req, "period")?;
    let source = parse_activity_source(req)?;
    check_activity_source(state, period, &source)?;
    if !exists(conn, "instruments", &instrument_id)? {
        return Err(HandlerErr::new("not_found", "instrument not found")
            .with_details(json!({ "instrumentId": instrument_id })));
    }
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = next_sort_order(conn, "activities")?;
    let (source_kind, instrument_key) = registry::encode_activity_source(&source);

    conn.execute(
        "INSERT INTO activities(id, instrument_id, period, name, source_kind, instrument_key, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           instrument_id = excluded.instrument_id,
           period = excluded.period,
           name = excluded.name,
           source_kind = excluded.source_kind,
           instrument_key = excluded.instrument_key",
        (
            &id,
            &instrument_id,
            period.as_key(),
            &name,
            source_kind,
            instrument_key,
            sort_order,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({ "activityId": id }))
}

fn outcomes_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sources = load_sources(conn)?;
    let outcomes: Vec<serde_json::Value> = sources
        .outcomes
        .iter()
        .map(|o| {
            let criteria: Vec<_> = o
                .criterion_ids
                .iter()
                .filter_map(|id| sources.criterion(id))
                .collect();
            let ponderacion_sum: f64 = criteria.iter().map(|c| c.weight).sum();
            json!({
                "id": o.id,
                "code": o.code,
                "description": o.description,
                "weight": o.weight,
                "criteria": criteria,
                "criteriaWeightSum": ponderacion_sum,
                "criteriaWeightDiscrepancy": ponderacion_sum - 100.0,
            })
        })
        .collect();
    let weight_sum: f64 = sources.outcomes.iter().map(|o| o.weight).sum();
    Ok(json!({
        "outcomes": outcomes,
        "weightSum": weight_sum,
        "weightDiscrepancy": weight_sum - 100.0,
    }))
}

fn outcomes_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let code = required_str(req, "code")?;
    let description = optional_str(req, "description").unwrap_or_default();
    let weight = weight_param(req)?;
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = next_sort_order(conn, "learning_outcomes")?;

    conn.execute(
        "INSERT INTO learning_outcomes(id, code, description, weight, sort_order)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           code = excluded.code,
           description = excluded.description,
           weight = excluded.weight",
        (&id, &code, &description, weight, sort_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({ "outcomeId": id }))
}

fn criteria_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let outcome_id = required_str(req, "outcomeId")?;
    let code = required_str(req, "code")?;
    let description = optional_str(req, "description").unwrap_or_default();
    let weight = weight_param(req)?;
    if !exists(conn, "learning_outcomes", &outcome_id)? {
        return Err(HandlerErr::new("not_found", "learning outcome not found")
            .with_details(json!({ "outcomeId": outcome_id })));
    }
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = next_sort_order(conn, "criteria")?;

    conn.execute(
        "INSERT INTO criteria(id, outcome_id, code, description, weight, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           outcome_id = excluded.outcome_id,
           code = excluded.code,
           description = excluded.description,
           weight = excluded.weight",
        (&id, &outcome_id, &code, &description, weight, sort_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    Ok(json!({ "criterionId": id }))
}

/// Replaces every association of a criterion. Activity ids are stored as
/// given; ids that do not resolve are simply ungraded.
fn criteria_associations_set(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let criterion_id = required_str(req, "criterionId")?;
    let raw = req
        .params
        .get("associations")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let associations: Vec<CriterionAssociation> = serde_json::from_value(raw).map_err(|e| {
        HandlerErr::bad_params(format!(
            "associations must be [{{unitOfWork, activityIds}}]: {}",
            e
        ))
    })?;

    let Some(conn) = state.db.as_mut() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    if !exists(conn, "criteria", &criterion_id)? {
        return Err(HandlerErr::new("not_found", "criterion not found")
            .with_details(json!({ "criterionId": criterion_id })));
    }

    let tx = conn
        .transaction()
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.execute(
        "DELETE FROM criterion_associations WHERE criterion_id = ?",
        [&criterion_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    let mut unresolved = 0_usize;
    for (i, assoc) in associations.iter().enumerate() {
        for activity_id in &assoc.activity_ids {
            if !exists(&tx, "activities", activity_id)? {
                unresolved += 1;
            }
        }
        let ids_json = serde_json::to_string(&assoc.activity_ids)
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        tx.execute(
            "INSERT INTO criterion_associations(id, criterion_id, unit_of_work, activity_ids, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &criterion_id,
                assoc.unit_of_work.trim(),
                ids_json,
                i as i64,
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    if unresolved > 0 {
        tracing::warn!(criterion = %criterion_id, unresolved, "association references unknown activities");
    }
    Ok(json!({
        "criterionId": criterion_id,
        "associationCount": associations.len(),
        "unresolvedActivityCount": unresolved,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "instruments.list" => instruments_list(state),
        "instruments.upsert" => instruments_upsert(state, req),
        "instruments.delete" => db_conn(state).and_then(|c| delete_by_id(c, "instruments", req)),
        "activities.upsert" => activities_upsert(state, req),
        "activities.delete" => db_conn(state).and_then(|c| delete_by_id(c, "activities", req)),
        "outcomes.list" => outcomes_list(state),
        "outcomes.upsert" => outcomes_upsert(state, req),
        "outcomes.delete" => {
            db_conn(state).and_then(|c| delete_by_id(c, "learning_outcomes", req))
        }
        "criteria.upsert" => criteria_upsert(state, req),
        "criteria.delete" => db_conn(state).and_then(|c| delete_by_id(c, "criteria", req)),
        "criteria.associations.set" => criteria_associations_set(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
