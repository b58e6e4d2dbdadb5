//! Grade aggregation engine.
//!
//! Every function here is a pure computation over a [`GradeSources`] snapshot.
//! Missing data never raises: it becomes [`Grade::Absent`] and is left out of
//! every average it would otherwise feed.

pub mod model;
pub mod numeric;
pub mod outcomes;
pub mod periods;
pub mod practical_exam;
pub mod service_day;

pub use model::*;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

pub const DISPLAY_DECIMALS: u32 = 2;

/// `coverage` is the total weight of the inputs that produced `value`. For
/// unweighted means it is the number of contributing inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Grade {
    Absent,
    Present { value: f64, coverage: f64 },
}

impl Grade {
    pub fn present(value: f64, coverage: f64) -> Self {
        Grade::Present { value, coverage }
    }

    /// Guard for raw registry values: anything that is not a finite number in
    /// [0, 10] is treated as "not graded yet".
    pub fn from_raw(raw: Option<f64>) -> Self {
        match raw {
            Some(v) if is_valid_score(v) => Grade::Present {
                value: v,
                coverage: 1.0,
            },
            _ => Grade::Absent,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Grade::Absent => None,
            Grade::Present { value, .. } => Some(*value),
        }
    }

    pub fn coverage(&self) -> f64 {
        match self {
            Grade::Absent => 0.0,
            Grade::Present { coverage, .. } => *coverage,
        }
    }

    pub fn rounded(&self) -> Option<f64> {
        self.value().map(|v| numeric::round(v, DISPLAY_DECIMALS))
    }
}

pub fn is_valid_score(v: f64) -> bool {
    v.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&v)
}
