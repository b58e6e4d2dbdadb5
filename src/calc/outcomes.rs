//! Criterion, learning-outcome (RA), instrument and module grades.

use super::numeric::{mean_of_present, weighted_of_present};
use super::{
    practical_exam, service_day, ActivitySource, EvaluationActivity, EvaluationCriterion,
    EvaluationInstrument, Grade, GradeSources, LearningOutcome,
};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct CriterionResult {
    pub criterion_id: String,
    pub weight: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeResult {
    pub outcome_id: String,
    pub weight: f64,
    pub declared_weight: f64,
    pub grade: Grade,
    pub criteria: Vec<CriterionResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleResult {
    pub declared_weight: f64,
    pub grade: Grade,
    pub outcomes: Vec<OutcomeResult>,
}

pub fn activity_grade(
    sources: &GradeSources,
    activity: &EvaluationActivity,
    student_id: &str,
) -> Grade {
    match &activity.source {
        ActivitySource::Manual { instrument_key } => Grade::from_raw(
            sources
                .academic_grades
                .get(student_id, activity.period, instrument_key),
        ),
        ActivitySource::ServiceAverage => {
            service_day::trimester_average(sources, student_id, activity.period)
        }
        ActivitySource::PracticalExam => {
            practical_exam::stored_score(sources, student_id, activity.period)
        }
    }
}

/// Activities behind a criterion, in association order, each at most once.
/// Ids that no longer resolve are dropped.
pub fn criterion_activities<'a>(
    sources: &'a GradeSources,
    criterion: &EvaluationCriterion,
) -> Vec<&'a EvaluationActivity> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for assoc in &criterion.associations {
        for id in &assoc.activity_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(activity) = sources.activity(id) {
                out.push(activity);
            }
        }
    }
    out
}

pub fn criterion_grade(
    sources: &GradeSources,
    criterion: &EvaluationCriterion,
    student_id: &str,
) -> Grade {
    mean_of_present(
        criterion_activities(sources, criterion)
            .into_iter()
            .map(|a| activity_grade(sources, a, student_id)),
    )
}

/// Weighted mean of the graded criteria. Coverage is the ponderación that has
/// actually been evaluated, so 65 out of a declared 100 reads as provisional.
pub fn outcome_grade(
    sources: &GradeSources,
    outcome: &LearningOutcome,
    student_id: &str,
) -> OutcomeResult {
    let criteria: Vec<CriterionResult> = outcome
        .criterion_ids
        .iter()
        .filter_map(|id| sources.criterion(id))
        .map(|c| CriterionResult {
            criterion_id: c.id.clone(),
            weight: c.weight,
            grade: criterion_grade(sources, c, student_id),
        })
        .collect();

    let declared_weight: f64 = criteria.iter().map(|c| c.weight).sum();
    let grade = weighted_of_present(criteria.iter().map(|c| (c.grade, c.weight)));

    OutcomeResult {
        outcome_id: outcome.id.clone(),
        weight: outcome.weight,
        declared_weight,
        grade,
        criteria,
    }
}

pub fn module_grade(sources: &GradeSources, student_id: &str) -> ModuleResult {
    let outcomes: Vec<OutcomeResult> = sources
        .outcomes
        .iter()
        .map(|o| outcome_grade(sources, o, student_id))
        .collect();
    let declared_weight: f64 = outcomes.iter().map(|o| o.weight).sum();
    let grade = weighted_of_present(outcomes.iter().map(|o| (o.grade, o.weight)));
    ModuleResult {
        declared_weight,
        grade,
        outcomes,
    }
}

pub fn instrument_grade(
    sources: &GradeSources,
    instrument: &EvaluationInstrument,
    student_id: &str,
) -> Grade {
    mean_of_present(
        sources
            .activities
            .iter()
            .filter(|a| a.instrument_id == instrument.id)
            .map(|a| activity_grade(sources, a, student_id)),
    )
}
