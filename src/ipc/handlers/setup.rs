use crate::calc::{practical_exam, service_day};
use crate::config::{EngineConfig, PERIOD_TABLES_SETTING};
use crate::db;
use crate::ipc::helpers::{db_conn, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn config_json(config: &EngineConfig) -> serde_json::Value {
    let periods: Vec<serde_json::Value> = config
        .to_raw()
        .into_iter()
        .zip(config.periods.iter())
        .map(|(raw, table)| {
            let declared = table.declared_weight();
            json!({
                "period": raw.period,
                "instruments": raw.instruments,
                "weightSum": declared,
                "weightDiscrepancy": declared - 100.0,
            })
        })
        .collect();

    json!({
        "periods": periods,
        "serviceRubric": {
            "individualWeight": service_day::INDIVIDUAL_WEIGHT,
            "groupWeight": service_day::GROUP_WEIGHT,
            "individualSlotMax": service_day::INDIVIDUAL_SLOT_MAX,
            "groupSlotMax": service_day::GROUP_SLOT_MAX,
        },
        "practicalExamRubric": {
            "groups": practical_exam::EXAM_RUBRIC,
            "scale": practical_exam::SCORE_SCALE,
        },
    })
}

fn setup_get(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(config_json(&state.config))
}

/// Validates the whole override before storing it: an unknown calculated key
/// is rejected here, never discovered while grading.
fn setup_periods_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(raw) = req.params.get("periods") else {
        return Err(HandlerErr::bad_params("missing periods"));
    };
    let config = EngineConfig::from_json(raw).map_err(|e| {
        tracing::warn!(error = %e, "rejected period table override");
        HandlerErr::new("config_invalid", e.to_string())
    })?;

    let stored = serde_json::to_value(config.to_raw())
        .map_err(|e| HandlerErr::new("config_invalid", e.to_string()))?;
    db::settings_set_json(conn, PERIOD_TABLES_SETTING, &stored)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    tracing::info!("period table override saved");
    let out = config_json(&config);
    state.config = config;
    Ok(out)
}

fn setup_periods_reset(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    db::settings_delete(conn, PERIOD_TABLES_SETTING)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    state.config = EngineConfig::defaults();
    tracing::info!("period tables reset to defaults");
    Ok(config_json(&state.config))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => setup_get(state),
        "setup.periods.set" => setup_periods_set(state, req),
        "setup.periods.reset" => setup_periods_reset(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
