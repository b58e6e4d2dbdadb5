//! Practical exam rubric: four weighted learning-outcome groups, each with
//! independently scored criteria.

use super::numeric::{mean_of_present, weighted_of_present};
use super::{ExamCells, Grade, GradeSources, Period};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamOutcomeGroup {
    pub key: &'static str,
    pub label: &'static str,
    pub weight: f64,
    pub criteria: &'static [&'static str],
}

pub const EXAM_RUBRIC: [ExamOutcomeGroup; 4] = [
    ExamOutcomeGroup {
        key: "ra1",
        label: "RA1",
        weight: 20.0,
        criteria: &["a", "b", "c"],
    },
    ExamOutcomeGroup {
        key: "ra2",
        label: "RA2",
        weight: 30.0,
        criteria: &["a", "b", "c", "d"],
    },
    ExamOutcomeGroup {
        key: "ra3",
        label: "RA3",
        weight: 30.0,
        criteria: &["a", "b", "c", "d"],
    },
    ExamOutcomeGroup {
        key: "ra4",
        label: "RA4",
        weight: 20.0,
        criteria: &["a", "b", "c"],
    },
];

/// Levels offered by the exam-entry screen. The aggregator accepts any value
/// in [0, 10].
pub const SCORE_SCALE: [f64; 4] = [10.0, 8.0, 5.0, 2.0];

pub fn rubric_group(key: &str) -> Option<&'static ExamOutcomeGroup> {
    EXAM_RUBRIC.iter().find(|g| g.key == key)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    pub key: &'static str,
    pub weight: f64,
    pub grade: Grade,
}

pub fn group_results(cells: &ExamCells) -> Vec<GroupResult> {
    EXAM_RUBRIC
        .iter()
        .map(|g| {
            let grade = cells
                .get(g.key)
                .map(|criteria| mean_of_present(criteria.values().map(|c| Grade::from_raw(c.score))))
                .unwrap_or(Grade::Absent);
            GroupResult {
                key: g.key,
                weight: g.weight,
                grade,
            }
        })
        .collect()
}

/// Weighted mean over the groups with at least one scored criterion.
pub fn final_score(cells: &ExamCells) -> Grade {
    weighted_of_present(group_results(cells).into_iter().map(|g| (g.grade, g.weight)))
}

/// Score persisted when the exam was saved. Never recomputed here.
pub fn stored_score(sources: &GradeSources, student_id: &str, exam_period: Period) -> Grade {
    sources
        .practical_exam(student_id, exam_period)
        .map(|e| Grade::from_raw(e.final_score))
        .unwrap_or(Grade::Absent)
}
