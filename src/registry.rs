//! Grade Source Registry: reads a complete [`GradeSources`] snapshot out of
//! the workspace database. Rows that do not decode are logged and left out,
//! which the engine then sees as "no data yet".

use crate::calc::{
    AcademicGrades, ActivitySource, CriterionAssociation, EvaluationActivity, EvaluationCriterion,
    EvaluationInstrument, ExamCells, GradeSources, GroupServiceScore, IndividualServiceScore,
    LearningOutcome, Period, PracticalExamEvaluation, Service, ServiceEvaluation, Student,
};
use anyhow::Context;
use rusqlite::Connection;
use std::collections::BTreeMap;

pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_SERVICE_AVERAGE: &str = "serviceAverage";
pub const SOURCE_PRACTICAL_EXAM: &str = "practicalExam";

pub fn decode_activity_source(kind: &str, instrument_key: Option<String>) -> Option<ActivitySource> {
    match kind {
        SOURCE_MANUAL => instrument_key
            .filter(|k| !k.trim().is_empty())
            .map(|instrument_key| ActivitySource::Manual { instrument_key }),
        SOURCE_SERVICE_AVERAGE => Some(ActivitySource::ServiceAverage),
        SOURCE_PRACTICAL_EXAM => Some(ActivitySource::PracticalExam),
        _ => None,
    }
}

pub fn encode_activity_source(source: &ActivitySource) -> (&'static str, Option<&str>) {
    match source {
        ActivitySource::Manual { instrument_key } => (SOURCE_MANUAL, Some(instrument_key.as_str())),
        ActivitySource::ServiceAverage => (SOURCE_SERVICE_AVERAGE, None),
        ActivitySource::PracticalExam => (SOURCE_PRACTICAL_EXAM, None),
    }
}

fn decode_period(raw: &str, what: &str, id: &str) -> Option<Period> {
    let p = Period::from_key(raw);
    if p.is_none() {
        tracing::warn!(%what, %id, period = %raw, "skipping row with unknown period");
    }
    p
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, sort_order FROM students ORDER BY sort_order, display_name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Student {
                id: r.get(0)?,
                display_name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_instruments(conn: &Connection) -> anyhow::Result<Vec<EvaluationInstrument>> {
    let mut stmt =
        conn.prepare("SELECT id, name, weight, sort_order FROM instruments ORDER BY sort_order")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(EvaluationInstrument {
                id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_activities(conn: &Connection) -> anyhow::Result<Vec<EvaluationActivity>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.instrument_id, a.period, a.name, a.source_kind, a.instrument_key
         FROM activities a
         JOIN instruments i ON i.id = a.instrument_id
         ORDER BY i.sort_order, a.sort_order",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, instrument_id, period, name, source_kind, instrument_key) in rows {
        let Some(period) = decode_period(&period, "activity", &id) else {
            continue;
        };
        let Some(source) = decode_activity_source(&source_kind, instrument_key) else {
            tracing::warn!(activity = %id, source = %source_kind, "skipping activity with unusable source");
            continue;
        };
        out.push(EvaluationActivity {
            id,
            instrument_id,
            period,
            name,
            source,
        });
    }
    Ok(out)
}

/// Outcomes with their ordered criterion ids, and every criterion with its
/// associations.
pub fn load_outcomes(
    conn: &Connection,
) -> anyhow::Result<(Vec<LearningOutcome>, Vec<EvaluationCriterion>)> {
    let mut assoc_stmt = conn.prepare(
        "SELECT criterion_id, unit_of_work, activity_ids
         FROM criterion_associations
         ORDER BY criterion_id, sort_order",
    )?;
    let assoc_rows = assoc_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut associations: BTreeMap<String, Vec<CriterionAssociation>> = BTreeMap::new();
    for (criterion_id, unit_of_work, ids_json) in assoc_rows {
        let activity_ids: Vec<String> = match serde_json::from_str(&ids_json) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(criterion = %criterion_id, error = %e, "unreadable association activity list");
                Vec::new()
            }
        };
        associations
            .entry(criterion_id)
            .or_default()
            .push(CriterionAssociation {
                unit_of_work,
                activity_ids,
            });
    }

    let mut crit_stmt = conn.prepare(
        "SELECT c.id, c.outcome_id, c.code, c.description, c.weight
         FROM criteria c
         JOIN learning_outcomes o ON o.id = c.outcome_id
         ORDER BY o.sort_order, c.sort_order",
    )?;
    let criteria: Vec<EvaluationCriterion> = crit_stmt
        .query_map([], |r| {
            Ok(EvaluationCriterion {
                id: r.get(0)?,
                outcome_id: r.get(1)?,
                code: r.get(2)?,
                description: r.get(3)?,
                weight: r.get(4)?,
                associations: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut c| {
            c.associations = associations.remove(&c.id).unwrap_or_default();
            c
        })
        .collect();

    let mut outcome_stmt = conn.prepare(
        "SELECT id, code, description, weight FROM learning_outcomes ORDER BY sort_order",
    )?;
    let outcomes: Vec<LearningOutcome> = outcome_stmt
        .query_map([], |r| {
            Ok(LearningOutcome {
                id: r.get(0)?,
                code: r.get(1)?,
                description: r.get(2)?,
                weight: r.get(3)?,
                criterion_ids: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut o| {
            o.criterion_ids = criteria
                .iter()
                .filter(|c| c.outcome_id == o.id)
                .map(|c| c.id.clone())
                .collect();
            o
        })
        .collect();

    Ok((outcomes, criteria))
}

pub fn load_services(conn: &Connection) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, trimester, date, locked FROM services ORDER BY sort_order, date",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, name, trimester, date, locked)| {
            let trimester = decode_period(&trimester, "service", &id)?;
            Some(Service {
                id,
                name,
                trimester,
                date,
                locked: locked != 0,
            })
        })
        .collect())
}

pub fn decode_service_evaluation(
    service_id: String,
    individual_json: &str,
    groups_json: &str,
) -> ServiceEvaluation {
    let individual: BTreeMap<String, IndividualServiceScore> =
        serde_json::from_str(individual_json).unwrap_or_else(|e| {
            tracing::warn!(service = %service_id, error = %e, "unreadable individual service scores");
            BTreeMap::new()
        });
    let groups: Vec<GroupServiceScore> = serde_json::from_str(groups_json).unwrap_or_else(|e| {
        tracing::warn!(service = %service_id, error = %e, "unreadable group service scores");
        Vec::new()
    });
    ServiceEvaluation {
        service_id,
        individual,
        groups,
    }
}

pub fn load_service_evaluations(conn: &Connection) -> anyhow::Result<Vec<ServiceEvaluation>> {
    let mut stmt =
        conn.prepare("SELECT service_id, individual_json, groups_json FROM service_evaluations")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, individual, groups)| decode_service_evaluation(id, &individual, &groups))
        .collect())
}

pub fn load_practical_exams(conn: &Connection) -> anyhow::Result<Vec<PracticalExamEvaluation>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, exam_period, cells_json, final_score
         FROM practical_exams
         ORDER BY student_id, exam_period",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (student_id, exam_period, cells_json, final_score) in rows {
        let Some(exam_period) = decode_period(&exam_period, "practical exam", &student_id) else {
            continue;
        };
        let cells: ExamCells = serde_json::from_str(&cells_json).unwrap_or_else(|e| {
            tracing::warn!(student = %student_id, error = %e, "unreadable practical exam cells");
            ExamCells::new()
        });
        out.push(PracticalExamEvaluation {
            student_id,
            exam_period,
            cells,
            final_score,
        });
    }
    Ok(out)
}

pub fn load_academic_grades(conn: &Connection) -> anyhow::Result<AcademicGrades> {
    let mut stmt =
        conn.prepare("SELECT student_id, period, instrument_key, value FROM academic_grades")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut grades = AcademicGrades::default();
    for (student_id, period, key, value) in rows {
        if let Some(period) = decode_period(&period, "academic grade", &student_id) {
            grades.set(&student_id, period, &key, value);
        }
    }
    Ok(grades)
}

/// One consistent snapshot of every registry.
pub fn load_sources(conn: &Connection) -> anyhow::Result<GradeSources> {
    let students = load_students(conn).context("failed to load students")?;
    let instruments = load_instruments(conn).context("failed to load instruments")?;
    let activities = load_activities(conn).context("failed to load activities")?;
    let (outcomes, criteria) = load_outcomes(conn).context("failed to load learning outcomes")?;
    let services = load_services(conn).context("failed to load services")?;
    let service_evaluations =
        load_service_evaluations(conn).context("failed to load service evaluations")?;
    let practical_exams = load_practical_exams(conn).context("failed to load practical exams")?;
    let academic_grades = load_academic_grades(conn).context("failed to load academic grades")?;

    Ok(GradeSources {
        students,
        instruments,
        activities,
        outcomes,
        criteria,
        services,
        service_evaluations,
        practical_exams,
        academic_grades,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn temp_conn(prefix: &str) -> Connection {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        db::open_db(&p).expect("open db")
    }

    #[test]
    fn snapshot_orders_criteria_under_their_outcome() {
        let conn = temp_conn("gradebook-registry");
        conn.execute(
            "INSERT INTO learning_outcomes(id, code, description, weight, sort_order)
             VALUES('ra1','RA1','',60,0), ('ra2','RA2','',40,1)",
            [],
        )
        .expect("outcomes");
        conn.execute(
            "INSERT INTO criteria(id, outcome_id, code, description, weight, sort_order)
             VALUES('c2','ra1','b','',50,1), ('c1','ra1','a','',50,0), ('c3','ra2','a','',100,0)",
            [],
        )
        .expect("criteria");
        conn.execute(
            "INSERT INTO criterion_associations(id, criterion_id, unit_of_work, activity_ids, sort_order)
             VALUES('as1','c1','UT1','[\"a1\",\"a2\"]',0), ('as2','c1','UT2','not json',1)",
            [],
        )
        .expect("associations");

        let sources = load_sources(&conn).expect("snapshot");
        assert_eq!(sources.outcomes[0].criterion_ids, vec!["c1", "c2"]);
        assert_eq!(sources.outcomes[1].criterion_ids, vec!["c3"]);
        let c1 = sources.criterion("c1").expect("c1");
        assert_eq!(c1.associations.len(), 2);
        assert_eq!(c1.associations[0].activity_ids, vec!["a1", "a2"]);
        assert!(c1.associations[1].activity_ids.is_empty());
    }

    #[test]
    fn undecodable_rows_degrade_to_missing_data() {
        let conn = temp_conn("gradebook-registry-bad");
        conn.execute(
            "INSERT INTO students(id, display_name, sort_order) VALUES('s1','Ana',0)",
            [],
        )
        .expect("student");
        conn.execute(
            "INSERT INTO academic_grades(student_id, period, instrument_key, value)
             VALUES('s1','t9','examen1',7.0), ('s1','t1','examen1',6.5)",
            [],
        )
        .expect("grades");
        conn.execute(
            "INSERT INTO services(id, name, trimester, date, locked, sort_order)
             VALUES('sv1','Servicio','t1',NULL,0,0)",
            [],
        )
        .expect("service");
        conn.execute(
            "INSERT INTO service_evaluations(service_id, individual_json, groups_json)
             VALUES('sv1','{broken','[]')",
            [],
        )
        .expect("evaluation");

        let sources = load_sources(&conn).expect("snapshot");
        assert_eq!(
            sources.academic_grades.get("s1", Period::First, "examen1"),
            Some(6.5)
        );
        let e = sources.service_evaluation("sv1").expect("evaluation");
        assert!(e.individual.is_empty());
    }

    #[test]
    fn activity_sources_round_trip_through_columns() {
        for source in [
            ActivitySource::Manual {
                instrument_key: "examen1".to_string(),
            },
            ActivitySource::ServiceAverage,
            ActivitySource::PracticalExam,
        ] {
            let (kind, key) = encode_activity_source(&source);
            assert_eq!(
                decode_activity_source(kind, key.map(str::to_string)),
                Some(source.clone())
            );
        }
        assert_eq!(decode_activity_source(SOURCE_MANUAL, None), None);
        assert_eq!(decode_activity_source("rubric", None), None);
    }
}
