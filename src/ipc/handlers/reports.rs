//! Report models for the presentation layer: plain numbers or null, never
//! formatted text.

use crate::calc::{
    outcomes, periods, practical_exam, service_day, GradeSources, InstrumentKind, Period, Student,
};
use crate::ipc::helpers::{
    db_conn, grade_json, load_sources, optional_str, required_period, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn selected_students<'a>(
    sources: &'a GradeSources,
    req: &Request,
) -> Result<Vec<&'a Student>, HandlerErr> {
    match optional_str(req, "studentId") {
        None => Ok(sources.students.iter().collect()),
        Some(id) => sources.student(&id).map(|s| vec![s]).ok_or_else(|| {
            HandlerErr::new("not_found", "student not found").with_details(json!({ "studentId": id }))
        }),
    }
}

fn reports_period_averages(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let period = required_period(req, "period")?;
    let Some(table) = state.config.table(period) else {
        return Err(HandlerErr::new("not_found", "no instrument table for period")
            .with_details(json!({ "period": period.as_key() })));
    };
    let sources = load_sources(conn)?;

    let columns: Vec<serde_json::Value> = table
        .instruments
        .iter()
        .map(|d| {
            json!({
                "key": d.key,
                "name": d.name,
                "weight": d.weight,
                "calculated": d.kind != InstrumentKind::Manual,
            })
        })
        .collect();

    let rows: Vec<serde_json::Value> = periods::period_averages(&sources, table)
        .into_iter()
        .zip(sources.students.iter())
        .map(|(avg, student)| {
            let values: Vec<serde_json::Value> = avg
                .instruments
                .iter()
                .map(|i| {
                    json!({
                        "key": i.key,
                        "name": i.name,
                        "weight": i.weight,
                        "calculated": i.calculated,
                        "grade": grade_json(&i.grade),
                    })
                })
                .collect();
            json!({
                "period": avg.period,
                "studentId": avg.student_id,
                "displayName": student.display_name,
                "average": grade_json(&avg.grade),
                "instruments": values,
            })
        })
        .collect();

    Ok(json!({
        "period": period.as_key(),
        "columns": columns,
        "declaredWeight": table.declared_weight(),
        "weightDiscrepancy": table.declared_weight() - 100.0,
        "rows": rows,
    }))
}

fn reports_service_averages(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let trimester = required_period(req, "trimester")?;
    let sources = load_sources(conn)?;

    let services: Vec<_> = sources
        .services
        .iter()
        .filter(|s| s.trimester == trimester)
        .collect();
    let rows: Vec<serde_json::Value> = sources
        .students
        .iter()
        .map(|s| {
            let breakdown: Vec<serde_json::Value> =
                service_day::trimester_breakdown(&sources, &s.id, trimester)
                    .into_iter()
                    .map(|b| {
                        json!({
                            "serviceId": b.service_id,
                            "attended": b.attended,
                            "individualSum": b.individual_sum,
                            "groupSum": b.group_sum,
                            "groupHalved": b.group_halved,
                            "grade": grade_json(&b.grade),
                        })
                    })
                    .collect();
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "services": breakdown,
                "average": grade_json(&service_day::trimester_average(&sources, &s.id, trimester)),
            })
        })
        .collect();

    Ok(json!({
        "trimester": trimester.as_key(),
        "services": services,
        "rows": rows,
    }))
}

fn reports_practical_exams(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let exam_period = required_period(req, "examPeriod")?;
    let sources = load_sources(conn)?;

    let rows: Vec<serde_json::Value> = sources
        .students
        .iter()
        .map(|s| {
            let exam = sources.practical_exam(&s.id, exam_period);
            let groups: Vec<serde_json::Value> = exam
                .map(|e| practical_exam::group_results(&e.cells))
                .unwrap_or_default()
                .into_iter()
                .map(|g| json!({ "key": g.key, "weight": g.weight, "grade": grade_json(&g.grade) }))
                .collect();
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "saved": exam.is_some(),
                "groups": groups,
                "finalScore": practical_exam::stored_score(&sources, &s.id, exam_period).rounded(),
            })
        })
        .collect();

    Ok(json!({
        "examPeriod": exam_period.as_key(),
        "rubric": practical_exam::EXAM_RUBRIC,
        "rows": rows,
    }))
}

fn outcome_json(sources: &GradeSources, result: &outcomes::OutcomeResult) -> serde_json::Value {
    let outcome = sources.outcome(&result.outcome_id);
    let criteria: Vec<serde_json::Value> = result
        .criteria
        .iter()
        .map(|c| {
            let criterion = sources.criterion(&c.criterion_id);
            json!({
                "criterionId": c.criterion_id,
                "code": criterion.map(|x| x.code.as_str()),
                "weight": c.weight,
                "grade": grade_json(&c.grade),
            })
        })
        .collect();
    json!({
        "outcomeId": result.outcome_id,
        "code": outcome.map(|o| o.code.as_str()),
        "weight": result.weight,
        "declaredWeight": result.declared_weight,
        "weightDiscrepancy": result.declared_weight - 100.0,
        "grade": grade_json(&result.grade),
        "criteria": criteria,
    })
}

fn reports_outcomes(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sources = load_sources(conn)?;
    let students = selected_students(&sources, req)?;

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let module = outcomes::module_grade(&sources, &s.id);
            let per_outcome: Vec<serde_json::Value> = module
                .outcomes
                .iter()
                .map(|o| outcome_json(&sources, o))
                .collect();
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "module": {
                    "declaredWeight": module.declared_weight,
                    "grade": grade_json(&module.grade),
                },
                "outcomes": per_outcome,
            })
        })
        .collect();
    Ok(json!({ "rows": rows }))
}

fn reports_instruments(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sources = load_sources(conn)?;
    let students = selected_students(&sources, req)?;

    let columns: Vec<serde_json::Value> = sources
        .instruments
        .iter()
        .map(|i| json!({ "instrumentId": i.id, "name": i.name, "weight": i.weight }))
        .collect();
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let grades: Vec<serde_json::Value> = sources
                .instruments
                .iter()
                .map(|i| {
                    json!({
                        "instrumentId": i.id,
                        "grade": grade_json(&outcomes::instrument_grade(&sources, i, &s.id)),
                    })
                })
                .collect();
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "instruments": grades,
            })
        })
        .collect();
    Ok(json!({ "columns": columns, "rows": rows }))
}

/// Every period average of one student at once, for the student summary.
fn reports_student_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sources = load_sources(conn)?;
    if optional_str(req, "studentId").is_none() {
        return Err(HandlerErr::bad_params("missing studentId"));
    }
    let students = selected_students(&sources, req)?;
    let Some(student) = students.first() else {
        return Err(HandlerErr::bad_params("missing studentId"));
    };

    let by_period: Vec<serde_json::Value> = Period::ALL
        .iter()
        .filter_map(|p| state.config.table(*p))
        .map(|table| {
            let avg = periods::period_average(&sources, table, &student.id);
            json!({
                "period": table.period.as_key(),
                "average": grade_json(&avg.grade),
                "declaredWeight": avg.declared_weight,
                "weightDiscrepancy": avg.weight_discrepancy(),
            })
        })
        .collect();
    let module = outcomes::module_grade(&sources, &student.id);

    Ok(json!({
        "studentId": student.id,
        "displayName": student.display_name,
        "periods": by_period,
        "module": grade_json(&module.grade),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.periodAverages" => reports_period_averages(state, req),
        "reports.serviceAverages" => reports_service_averages(state, req),
        "reports.practicalExams" => reports_practical_exams(state, req),
        "reports.outcomes" => reports_outcomes(state, req),
        "reports.instruments" => reports_instruments(state, req),
        "reports.studentSummary" => reports_student_summary(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
