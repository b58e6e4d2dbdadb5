//! Weighted period average over a period's instrument table.

use super::numeric::weighted_of_present;
use super::{
    practical_exam, service_day, CalculatedSource, Grade, GradeSources, InstrumentDescriptor,
    InstrumentKind, Period, PeriodTable,
};

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentValue {
    pub key: String,
    pub name: String,
    pub weight: f64,
    pub calculated: bool,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodAverage {
    pub period: Period,
    pub student_id: String,
    pub declared_weight: f64,
    pub grade: Grade,
    pub instruments: Vec<InstrumentValue>,
}

impl PeriodAverage {
    pub fn weight_discrepancy(&self) -> f64 {
        self.declared_weight - 100.0
    }
}

pub fn instrument_value(
    sources: &GradeSources,
    period: Period,
    descriptor: &InstrumentDescriptor,
    student_id: &str,
) -> Grade {
    match descriptor.kind {
        InstrumentKind::Manual => Grade::from_raw(sources.academic_grades.get(
            student_id,
            period,
            &descriptor.key,
        )),
        InstrumentKind::Calculated(CalculatedSource::ServiceAverage(p)) => {
            service_day::trimester_average(sources, student_id, p)
        }
        InstrumentKind::Calculated(CalculatedSource::PracticalExam(p)) => {
            practical_exam::stored_score(sources, student_id, p)
        }
    }
}

/// Instruments without a value are left out of both the weighted sum and the
/// weight total. Absent when no instrument of the period has a value yet.
pub fn period_average(sources: &GradeSources, table: &PeriodTable, student_id: &str) -> PeriodAverage {
    let instruments: Vec<InstrumentValue> = table
        .instruments
        .iter()
        .map(|d| InstrumentValue {
            key: d.key.clone(),
            name: d.name.clone(),
            weight: d.weight,
            calculated: d.kind != InstrumentKind::Manual,
            grade: instrument_value(sources, table.period, d, student_id),
        })
        .collect();

    let grade = weighted_of_present(instruments.iter().map(|i| (i.grade, i.weight)));

    PeriodAverage {
        period: table.period,
        student_id: student_id.to_string(),
        declared_weight: table.declared_weight(),
        grade,
        instruments,
    }
}

pub fn period_averages(sources: &GradeSources, table: &PeriodTable) -> Vec<PeriodAverage> {
    sources
        .students
        .iter()
        .map(|s| period_average(sources, table, &s.id))
        .collect()
}
