//! Day-of-service rubric: one grade per student per trimester.

use super::numeric::mean_of_present;
use super::{Grade, GradeSources, Period, ServiceEvaluation};
use serde::Serialize;

pub const INDIVIDUAL_WEIGHT: f64 = 0.6;
pub const GROUP_WEIGHT: f64 = 0.4;

pub const INDIVIDUAL_SLOT_MAX: [f64; 10] = [1.0; 10];

pub const GROUP_SLOT_MAX: [f64; 8] = [1.0, 1.5, 1.0, 1.5, 1.0, 1.0, 1.0, 2.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBreakdown {
    pub service_id: String,
    pub attended: bool,
    pub individual_sum: f64,
    pub group_sum: f64,
    pub group_halved: bool,
    #[serde(skip)]
    pub grade: Grade,
}

/// Empty slots count as 0 inside a rubric sum. So does a slot outside
/// `0..=max` or past the end of the rubric.
fn slot_sum(scores: &[Option<f64>], maxima: &[f64]) -> f64 {
    scores
        .iter()
        .zip(maxima)
        .map(|(s, max)| match s {
            Some(v) if v.is_finite() && (0.0..=*max).contains(v) => *v,
            _ => 0.0,
        })
        .sum()
}

/// Breakdown of one service for one student. A student without an
/// individual record did not attend.
pub fn service_breakdown(evaluation: &ServiceEvaluation, student_id: &str) -> ServiceBreakdown {
    let record = evaluation
        .individual
        .get(student_id)
        .filter(|r| r.attended);
    let Some(record) = record else {
        return ServiceBreakdown {
            service_id: evaluation.service_id.clone(),
            attended: false,
            individual_sum: 0.0,
            group_sum: 0.0,
            group_halved: false,
            grade: Grade::Absent,
        };
    };

    let individual_sum = slot_sum(&record.scores, &INDIVIDUAL_SLOT_MAX);
    let mut group_sum = evaluation
        .group_of(student_id)
        .map(|g| slot_sum(&g.scores, &GROUP_SLOT_MAX))
        .unwrap_or(0.0);
    if record.halve_group_score {
        group_sum /= 2.0;
    }
    let value = individual_sum * INDIVIDUAL_WEIGHT + group_sum * GROUP_WEIGHT;

    ServiceBreakdown {
        service_id: evaluation.service_id.clone(),
        attended: true,
        individual_sum,
        group_sum,
        group_halved: record.halve_group_score,
        grade: Grade::present(value, 1.0),
    }
}

pub fn trimester_breakdown(
    sources: &GradeSources,
    student_id: &str,
    trimester: Period,
) -> Vec<ServiceBreakdown> {
    sources
        .services
        .iter()
        .filter(|s| s.trimester == trimester)
        .filter_map(|s| sources.service_evaluation(&s.id))
        .map(|e| service_breakdown(e, student_id))
        .collect()
}

/// Mean of the per-service grades over the services the student attended.
/// Absent when the student attended none.
pub fn trimester_average(sources: &GradeSources, student_id: &str, trimester: Period) -> Grade {
    mean_of_present(
        trimester_breakdown(sources, student_id, trimester)
            .into_iter()
            .map(|b| b.grade),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{GroupServiceScore, IndividualServiceScore, Service};
    use std::collections::BTreeMap;

    fn service(id: &str, trimester: Period) -> Service {
        Service {
            id: id.to_string(),
            name: format!("Servicio {}", id),
            trimester,
            date: None,
            locked: false,
        }
    }

    fn evaluation(
        service_id: &str,
        student_id: &str,
        individual: IndividualServiceScore,
        group_scores: Vec<Option<f64>>,
    ) -> ServiceEvaluation {
        let mut map = BTreeMap::new();
        map.insert(student_id.to_string(), individual);
        ServiceEvaluation {
            service_id: service_id.to_string(),
            individual: map,
            groups: vec![GroupServiceScore {
                group_id: "g1".to_string(),
                members: vec![student_id.to_string()],
                scores: group_scores,
            }],
        }
    }

    fn attended(scores: Vec<Option<f64>>, halve: bool) -> IndividualServiceScore {
        IndividualServiceScore {
            attended: true,
            scores,
            notes: String::new(),
            halve_group_score: halve,
        }
    }

    fn sample_individual() -> Vec<Option<f64>> {
        vec![
            Some(1.0),
            Some(1.0),
            None,
            Some(0.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
        ]
    }

    fn full_group() -> Vec<Option<f64>> {
        GROUP_SLOT_MAX.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn single_service_combines_individual_and_group() {
        let sources = GradeSources {
            services: vec![service("sv1", Period::First)],
            service_evaluations: vec![evaluation(
                "sv1",
                "s1",
                attended(sample_individual(), false),
                full_group(),
            )],
            ..Default::default()
        };

        let avg = trimester_average(&sources, "s1", Period::First);
        assert_eq!(avg.rounded(), Some(5.2));
        assert_eq!(avg.coverage(), 1.0);
    }

    #[test]
    fn halving_flag_halves_only_the_group_sum() {
        let e = evaluation(
            "sv1",
            "s1",
            attended(sample_individual(), true),
            full_group(),
        );
        let b = service_breakdown(&e, "s1");
        assert_eq!(b.group_sum, 5.0);
        assert!(b.group_halved);
        // 2.0 * 0.6 + 5.0 * 0.4
        assert_eq!(b.grade.rounded(), Some(3.2));
    }

    #[test]
    fn absent_from_every_service_is_absent_not_zero() {
        let mut missed = attended(sample_individual(), false);
        missed.attended = false;
        let sources = GradeSources {
            services: vec![service("sv1", Period::Second), service("sv2", Period::Second)],
            service_evaluations: vec![
                evaluation("sv1", "s1", missed.clone(), full_group()),
                evaluation("sv2", "s1", missed, full_group()),
            ],
            ..Default::default()
        };
        assert_eq!(trimester_average(&sources, "s1", Period::Second), Grade::Absent);
    }

    #[test]
    fn missed_service_does_not_count_as_zero() {
        let mut missed = attended(sample_individual(), false);
        missed.attended = false;
        let sources = GradeSources {
            services: vec![service("sv1", Period::First), service("sv2", Period::First)],
            service_evaluations: vec![
                evaluation("sv1", "s1", attended(sample_individual(), false), full_group()),
                evaluation("sv2", "s1", missed, full_group()),
            ],
            ..Default::default()
        };
        assert_eq!(
            trimester_average(&sources, "s1", Period::First).rounded(),
            Some(5.2)
        );
    }

    #[test]
    fn services_of_other_trimesters_are_ignored() {
        let sources = GradeSources {
            services: vec![service("sv1", Period::First), service("sv2", Period::Second)],
            service_evaluations: vec![
                evaluation("sv1", "s1", attended(sample_individual(), false), full_group()),
                evaluation(
                    "sv2",
                    "s1",
                    attended(vec![Some(1.0); 10], false),
                    full_group(),
                ),
            ],
            ..Default::default()
        };
        assert_eq!(
            trimester_average(&sources, "s1", Period::Second).rounded(),
            Some(10.0)
        );
        assert_eq!(trimester_average(&sources, "s1", Period::Third), Grade::Absent);
    }

    #[test]
    fn student_without_record_or_group() {
        let e = evaluation(
            "sv1",
            "s1",
            attended(sample_individual(), false),
            full_group(),
        );
        assert_eq!(service_breakdown(&e, "s2").grade, Grade::Absent);

        let mut no_group = e.clone();
        no_group.groups.clear();
        let b = service_breakdown(&no_group, "s1");
        assert_eq!(b.group_sum, 0.0);
        assert_eq!(b.grade.rounded(), Some(1.2));
    }

    #[test]
    fn out_of_range_slots_count_as_zero() {
        let mut individual = vec![Some(-8.0), Some(1.0)];
        individual.resize(10, None);
        let mut group = vec![Some(40.0), Some(1.5)];
        group.resize(8, None);
        let sources = GradeSources {
            services: vec![service("sv1", Period::First)],
            service_evaluations: vec![evaluation(
                "sv1",
                "s1",
                attended(individual, false),
                group,
            )],
            ..Default::default()
        };

        let b = &trimester_breakdown(&sources, "s1", Period::First)[0];
        assert_eq!(b.individual_sum, 1.0);
        assert_eq!(b.group_sum, 1.5);
        let avg = trimester_average(&sources, "s1", Period::First);
        // 1.0 * 0.6 + 1.5 * 0.4
        assert_eq!(avg.rounded(), Some(1.2));
        assert!((0.0..=10.0).contains(&avg.value().unwrap_or(-1.0)));
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let sources = GradeSources {
            services: vec![service("sv1", Period::First), service("sv2", Period::First)],
            service_evaluations: vec![
                evaluation("sv1", "s1", attended(sample_individual(), false), full_group()),
                evaluation("sv2", "s1", attended(sample_individual(), true), full_group()),
            ],
            ..Default::default()
        };
        let a = trimester_average(&sources, "s1", Period::First);
        let b = trimester_average(&sources, "s1", Period::First);
        assert_eq!(a.value().map(f64::to_bits), b.value().map(f64::to_bits));
    }
}
