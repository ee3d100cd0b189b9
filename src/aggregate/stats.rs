//! Descriptive statistics and Welch's t-test.

use serde::{Deserialize, Serialize};

/// Mean, median and sample standard deviation of one group.
///
/// Every statistic is `None` when the group is empty; `stddev` is also
/// `None` for a single observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptive {
    pub n: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub stddev: Option<f64>,
}

impl Descriptive {
    pub fn of(values: &[f64]) -> Self {
        Self {
            n: values.len(),
            mean: mean(values),
            median: median(values),
            stddev: sample_stddev(values),
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample variance with the n-1 denominator.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Result of a two-tailed Welch's t-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelchTest {
    /// `None` when both groups have zero variance.
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: f64,
}

/// Welch's unequal-variance t-test of `a` against `b`.
///
/// Returns `None` unless both groups hold at least two observations. When
/// neither group varies, the test degenerates: p is 0 if the means differ
/// and 1 otherwise.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTest> {
    let (var_a, var_b) = (sample_variance(a)?, sample_variance(b)?);
    let (mean_a, mean_b) = (mean(a)?, mean(b)?);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    let se_a = var_a / na;
    let se_b = var_b / nb;
    let se = se_a + se_b;

    if se == 0.0 {
        let p_value = if mean_a == mean_b { 1.0 } else { 0.0 };
        return Some(WelchTest {
            t_statistic: None,
            degrees_of_freedom: None,
            p_value,
        });
    }

    let t = (mean_a - mean_b) / se.sqrt();
    let df = se.powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));

    Some(WelchTest {
        t_statistic: Some(t),
        degrees_of_freedom: Some(df),
        p_value: student_t_two_tailed(t, df),
    })
}

/// Two-tailed p-value of Student's t distribution.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function (Lanczos approximation).
fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized incomplete beta function I_x(a, b).
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only below this point.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta function (modified Lentz).
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 1e-15;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_descriptive_stats() {
        let stats = Descriptive::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.n, 8);
        assert!(close(stats.mean.unwrap(), 5.0, 1e-12));
        assert!(close(stats.median.unwrap(), 4.5, 1e-12));
        assert!(close(stats.stddev.unwrap(), (32.0f64 / 7.0).sqrt(), 1e-12));
    }

    #[test]
    fn test_descriptive_small_groups() {
        let empty = Descriptive::of(&[]);
        assert_eq!(empty.n, 0);
        assert_eq!(empty.mean, None);
        assert_eq!(empty.median, None);
        assert_eq!(empty.stddev, None);

        let single = Descriptive::of(&[3.0]);
        assert_eq!(single.mean, Some(3.0));
        assert_eq!(single.median, Some(3.0));
        assert_eq!(single.stddev, None);
    }

    #[test]
    fn test_ln_gamma_matches_factorials() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-12));
        assert!(close(ln_gamma(5.0), 24.0f64.ln(), 1e-10));
        assert!(close(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), 1e-10));
    }

    #[test]
    fn test_incomplete_beta_uniform_case() {
        for x in [0.1, 0.25, 0.5, 0.9] {
            assert!(close(regularized_incomplete_beta(1.0, 1.0, x), x, 1e-10));
        }
    }

    #[test]
    fn test_student_t_critical_values() {
        // 97.5th percentiles of the t distribution.
        assert!(close(student_t_two_tailed(2.228_138_85, 10.0), 0.05, 1e-5));
        assert!(close(student_t_two_tailed(12.706_204_7, 1.0), 0.05, 1e-5));
        assert!(close(student_t_two_tailed(0.0, 5.0), 1.0, 1e-12));
    }

    #[test]
    fn test_welch_known_result() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 3.0, 4.0, 5.0, 6.0];
        let test = welch_t_test(&a, &b).unwrap();
        assert!(close(test.t_statistic.unwrap(), -1.0, 1e-12));
        assert!(close(test.degrees_of_freedom.unwrap(), 8.0, 1e-12));
        assert!(close(test.p_value, 0.346_593, 1e-4));
    }

    #[test]
    fn test_welch_zero_variance() {
        let high = [4.0; 5];
        let low = [1.0; 5];
        assert_eq!(welch_t_test(&high, &low).unwrap().p_value, 0.0);
        assert_eq!(welch_t_test(&high, &high).unwrap().p_value, 1.0);
    }

    #[test]
    fn test_welch_requires_two_observations() {
        assert!(welch_t_test(&[1.0], &[2.0, 3.0]).is_none());
        assert!(welch_t_test(&[1.0, 2.0], &[]).is_none());
    }
}
