use super::Grade;

/// Scaled values are pushed this far away from zero before rounding so that
/// decimal halves stored just below .5 in binary (7.005, 1.005) round up.
const ROUNDING_NUDGE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedValue {
    pub value: f64,
    pub weight: f64,
}

/// Half away from zero. Non-finite input yields 0.
pub fn round(x: f64, decimals: u32) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let factor = 10_f64.powi(decimals as i32);
    let scaled = x * factor;
    (scaled + ROUNDING_NUDGE.copysign(scaled)).round() / factor
}

/// Arithmetic mean. Empty input is 0: call sites filter absent values first.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

fn weighted_ratio(pairs: &[WeightedValue]) -> Option<(f64, f64)> {
    let weight_sum: f64 = pairs.iter().map(|p| p.weight).sum();
    if weight_sum == 0.0 {
        return None;
    }
    let weighted: f64 = pairs.iter().map(|p| p.value * p.weight).sum();
    Some((weighted / weight_sum, weight_sum))
}

/// `round(Σ value·weight / Σ weight)`, or 0 when the weights sum to 0.
/// Grading goes through [`weighted_of_present`], which keeps absence.
#[cfg(test)]
pub fn weighted_mean(pairs: &[WeightedValue], decimals: u32) -> f64 {
    weighted_ratio(pairs)
        .map(|(v, _)| round(v, decimals))
        .unwrap_or(0.0)
}

pub fn mean_of_present<I>(grades: I) -> Grade
where
    I: IntoIterator<Item = Grade>,
{
    let values: Vec<f64> = grades.into_iter().filter_map(|g| g.value()).collect();
    if values.is_empty() {
        Grade::Absent
    } else {
        Grade::present(mean(&values), values.len() as f64)
    }
}

/// Unrounded weighted mean over the present grades. Absent grades add to
/// neither the numerator nor the weight sum; so do non-positive weights.
/// Coverage is the weight sum actually used.
pub fn weighted_of_present<I>(items: I) -> Grade
where
    I: IntoIterator<Item = (Grade, f64)>,
{
    let pairs: Vec<WeightedValue> = items
        .into_iter()
        .filter(|(_, weight)| weight.is_finite() && *weight > 0.0)
        .filter_map(|(grade, weight)| grade.value().map(|value| WeightedValue { value, weight }))
        .collect();
    match weighted_ratio(&pairs) {
        Some((value, weight_sum)) => Grade::present(value, weight_sum),
        None => Grade::Absent,
    }
}
