use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "t1")]
    First,
    #[serde(rename = "t2")]
    Second,
    #[serde(rename = "t3")]
    Third,
    #[serde(rename = "recuperacion")]
    Remediation,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::First,
        Period::Second,
        Period::Third,
        Period::Remediation,
    ];

    pub fn as_key(self) -> &'static str {
        match self {
            Period::First => "t1",
            Period::Second => "t2",
            Period::Third => "t3",
            Period::Remediation => "recuperacion",
        }
    }

    pub fn from_key(key: &str) -> Option<Period> {
        let k = key.trim();
        Period::ALL
            .into_iter()
            .find(|p| p.as_key().eq_ignore_ascii_case(k))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationInstrument {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub sort_order: i64,
}

/// Where the number for an activity comes from. Every variant reads at the
/// activity's own period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivitySource {
    #[serde(rename_all = "camelCase")]
    Manual { instrument_key: String },
    ServiceAverage,
    PracticalExam,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationActivity {
    pub id: String,
    pub instrument_id: String,
    pub period: Period,
    pub name: String,
    pub source: ActivitySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionAssociation {
    pub unit_of_work: String,
    pub activity_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationCriterion {
    pub id: String,
    pub outcome_id: String,
    pub code: String,
    pub description: String,
    /// Ponderación inside the outcome, percent. Not required to sum to 100.
    pub weight: f64,
    pub associations: Vec<CriterionAssociation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningOutcome {
    pub id: String,
    pub code: String,
    pub description: String,
    pub weight: f64,
    pub criterion_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub trimester: Period,
    pub date: Option<String>,
    /// Only gates edits; never read by the aggregators.
    pub locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualServiceScore {
    pub attended: bool,
    pub scores: Vec<Option<f64>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub halve_group_score: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupServiceScore {
    pub group_id: String,
    pub members: Vec<String>,
    pub scores: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvaluation {
    pub service_id: String,
    pub individual: BTreeMap<String, IndividualServiceScore>,
    pub groups: Vec<GroupServiceScore>,
}

impl ServiceEvaluation {
    pub fn group_of(&self, student_id: &str) -> Option<&GroupServiceScore> {
        self.groups
            .iter()
            .find(|g| g.members.iter().any(|m| m == student_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamCell {
    pub score: Option<f64>,
    #[serde(default)]
    pub note: String,
}

/// outcome group key -> criterion key -> cell
pub type ExamCells = BTreeMap<String, BTreeMap<String, ExamCell>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticalExamEvaluation {
    pub student_id: String,
    pub exam_period: Period,
    pub cells: ExamCells,
    /// Computed when the exam was saved; authoritative from then on.
    pub final_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcademicGrades {
    entries: BTreeMap<(String, Period), BTreeMap<String, Option<f64>>>,
}

impl AcademicGrades {
    pub fn get(&self, student_id: &str, period: Period, instrument_key: &str) -> Option<f64> {
        self.entries
            .get(&(student_id.to_string(), period))
            .and_then(|m| m.get(instrument_key))
            .copied()
            .flatten()
    }

    pub fn set(
        &mut self,
        student_id: &str,
        period: Period,
        instrument_key: &str,
        value: Option<f64>,
    ) {
        self.entries
            .entry((student_id.to_string(), period))
            .or_default()
            .insert(instrument_key.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "period", rename_all = "camelCase")]
pub enum CalculatedSource {
    ServiceAverage(Period),
    PracticalExam(Period),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Manual,
    Calculated(CalculatedSource),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentDescriptor {
    pub name: String,
    pub key: String,
    pub kind: InstrumentKind,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTable {
    pub period: Period,
    pub instruments: Vec<InstrumentDescriptor>,
}

impl PeriodTable {
    pub fn declared_weight(&self) -> f64 {
        self.instruments.iter().map(|i| i.weight).sum()
    }

    pub fn manual(&self, key: &str) -> Option<&InstrumentDescriptor> {
        self.instruments
            .iter()
            .find(|i| i.key == key && i.kind == InstrumentKind::Manual)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradeSources {
    pub students: Vec<Student>,
    pub instruments: Vec<EvaluationInstrument>,
    pub activities: Vec<EvaluationActivity>,
    pub outcomes: Vec<LearningOutcome>,
    pub criteria: Vec<EvaluationCriterion>,
    pub services: Vec<Service>,
    pub service_evaluations: Vec<ServiceEvaluation>,
    pub practical_exams: Vec<PracticalExamEvaluation>,
    pub academic_grades: AcademicGrades,
}

impl GradeSources {
    pub fn activity(&self, id: &str) -> Option<&EvaluationActivity> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn criterion(&self, id: &str) -> Option<&EvaluationCriterion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    pub fn outcome(&self, id: &str) -> Option<&LearningOutcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn service_evaluation(&self, service_id: &str) -> Option<&ServiceEvaluation> {
        self.service_evaluations
            .iter()
            .find(|e| e.service_id == service_id)
    }

    pub fn practical_exam(
        &self,
        student_id: &str,
        exam_period: Period,
    ) -> Option<&PracticalExamEvaluation> {
        self.practical_exams
            .iter()
            .find(|e| e.student_id == student_id && e.exam_period == exam_period)
    }
}
