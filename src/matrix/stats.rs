use serde::Serialize;
use std::cmp::Ordering;

pub const PASS_MARK: f64 = 10.0;
pub const GRADE_MAX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub pass_rate: f64,
}

/// Nearest-rank pick: `floor((n - 1) * p)`, no interpolation.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Descriptive statistics over a grade sample. Population standard deviation.
pub fn compute_stats(values: &[f64]) -> Option<Stats> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let passed = sorted.iter().filter(|v| **v >= PASS_MARK).count();

    Some(Stats {
        count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std_dev: variance.sqrt(),
        q1: nearest_rank(&sorted, 0.25),
        median: nearest_rank(&sorted, 0.5),
        q3: nearest_rank(&sorted, 0.75),
        pass_rate: 100.0 * passed as f64 / n,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionBin {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Equal-width bins over [0, 20]; each bin is `[min, max)` except the last,
/// which also takes 20. Values outside the grade range are not counted.
pub fn distribution(values: &[f64], bin_count: usize) -> Vec<DistributionBin> {
    let bin_count = bin_count.max(1);
    let width = GRADE_MAX / bin_count as f64;
    let mut bins: Vec<DistributionBin> = (0..bin_count)
        .map(|i| {
            let min = width * i as f64;
            let max = if i + 1 == bin_count {
                GRADE_MAX
            } else {
                width * (i + 1) as f64
            };
            DistributionBin {
                label: format!("{}-{}", fmt_bound(min), fmt_bound(max)),
                min,
                max,
                count: 0,
            }
        })
        .collect();

    for v in values {
        if !v.is_finite() || *v < 0.0 || *v > GRADE_MAX {
            continue;
        }
        let idx = ((*v / width).floor() as usize).min(bin_count - 1);
        bins[idx].count += 1;
    }
    bins
}

fn fmt_bound(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        format!("{:.1}", v)
    }
}
