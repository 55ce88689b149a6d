//! Score calibration utilities.
//!
//! Raw BM25 scores, cosine similarities, and reranker outputs live on
//! unrelated, query-dependent scales. Each request computes statistics over
//! the raw scores it actually saw and maps them through a logistic, so the
//! routing thresholds keep their meaning across query distributions.

/// Floor used wherever a near-zero spread would blow up a division.
pub const EPSILON: f64 = 1e-9;

/// Per-request statistics over one source's raw scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Compute stats over the provided values. Returns `None` when empty.
///
/// The standard deviation uses the Bessel (n-1) denominator for more than
/// one sample; a single sample gets the epsilon floor.
pub fn compute_stats(values: &[f64]) -> Option<ScoreStats> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        EPSILON
    };
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(ScoreStats {
        mean,
        std,
        min,
        max,
        count,
    })
}

/// Clamp to `[0, 1]`.
pub fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Map a raw score into `[0, 1]` using the request's statistics.
///
/// With a usable spread this is `σ((x − mean) / std · scale)`. With one
/// sample or a collapsed spread it degrades to min-max scaling, and a fully
/// degenerate distribution pins to `0.5`.
pub fn logistic_from_stats(x: f64, stats: Option<&ScoreStats>, scale: f64) -> f64 {
    let Some(stats) = stats else {
        return 0.5;
    };
    if stats.count > 1 && stats.std >= EPSILON {
        return clamp(sigmoid((x - stats.mean) / stats.std.max(EPSILON) * scale));
    }
    let range = stats.max - stats.min;
    if range < EPSILON {
        return 0.5;
    }
    clamp((x - stats.min) / range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_use_bessel_denominator() {
        let stats = compute_stats(&[1.0, 2.0, 3.0]).expect("stats");
        assert!((stats.mean - 2.0).abs() < 1e-12);
        // sample std of {1,2,3} is 1.0
        assert!((stats.std - 1.0).abs() < 1e-12);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
    }

    #[test]
    fn empty_values_yield_none() {
        assert!(compute_stats(&[]).is_none());
    }

    #[test]
    fn single_value_gets_floored_std() {
        let stats = compute_stats(&[4.2]).expect("stats");
        assert_eq!(stats.count, 1);
        assert!(stats.std <= EPSILON);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn logistic_maps_into_unit_interval() {
        let stats = compute_stats(&[0.1, 5.0, 9.3, 2.2]).expect("stats");
        for x in [-10.0, 0.1, 2.2, 9.3, 50.0] {
            let y = logistic_from_stats(x, Some(&stats), 1.0);
            assert!((0.0..=1.0).contains(&y), "{x} -> {y}");
        }
        // above-mean values land above 0.5
        assert!(logistic_from_stats(9.3, Some(&stats), 1.0) > 0.5);
        assert!(logistic_from_stats(0.1, Some(&stats), 1.0) < 0.5);
    }

    #[test]
    fn missing_stats_pin_to_half() {
        assert_eq!(logistic_from_stats(7.0, None, 1.0), 0.5);
    }

    #[test]
    fn degenerate_spread_falls_back_to_min_max() {
        // one sample: min == max, fully degenerate
        let one = compute_stats(&[3.0]).expect("stats");
        assert_eq!(logistic_from_stats(3.0, Some(&one), 1.0), 0.5);

        // identical samples: std is zero but count > 1
        let flat = compute_stats(&[2.0, 2.0, 2.0]).expect("stats");
        assert_eq!(logistic_from_stats(2.0, Some(&flat), 1.0), 0.5);
    }

    #[test]
    fn logistic_is_monotone_in_x() {
        let stats = compute_stats(&[1.0, 3.0, 8.0]).expect("stats");
        let lo = logistic_from_stats(1.0, Some(&stats), 1.0);
        let mid = logistic_from_stats(3.0, Some(&stats), 1.0);
        let hi = logistic_from_stats(8.0, Some(&stats), 1.0);
        assert!(lo < mid && mid < hi);
    }
}
