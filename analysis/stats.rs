//! # Statistical Routines
//!
//! The significance tests used by the coefficient and enrichment analyses.
//! Every result is an `Option<f64>`: a test that is undefined for its input
//! (an empty group, zero variance, too few observations) returns `None`,
//! which output tables render as `NA`. Nothing here ever substitutes zero.
//!
//! Conventions follow the reference statistics packages the downstream
//! analyses are compared against:
//!
//! * Fisher's exact test is two-sided and sums every table no more likely
//!   than the observed one, with a relative tolerance of `1e-7`.
//! * Mann-Whitney U is two-sided, exact for small tie-free samples and
//!   otherwise normal-approximated with tie and continuity correction.
//! * Kolmogorov-Smirnov compares against the standard normal with the
//!   asymptotic Kolmogorov distribution.
//! * Shapiro-Wilk follows Royston's algorithm (AS R94).

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::factorial::ln_binomial;
use std::cmp::Ordering;
use std::f64::consts::PI;

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

fn compare_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(compare_f64);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Standard deviation with `ddof` degrees of freedom removed (0 = population,
/// 1 = sample).
pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - ddof) as f64).sqrt())
}

/// Z-scores using the population standard deviation. `None` when the values
/// have no spread.
pub fn standardize(values: &[f64]) -> Option<Vec<f64>> {
    let m = mean(values)?;
    let s = std_dev(values, 0)?;
    if s == 0.0 || !s.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| (v - m) / s).collect())
}

/// Two-sided Fisher exact test of the table `[[a, b], [c, d]]`.
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let row1 = a + b;
    let col1 = a + c;
    let total = a + b + c + d;
    if total == 0 {
        return 1.0;
    }
    let low = (row1 + col1).saturating_sub(total);
    let high = row1.min(col1);
    let ln_denominator = ln_binomial(total, row1);
    let ln_pmf = |x: u64| ln_binomial(col1, x) + ln_binomial(total - col1, row1 - x) - ln_denominator;

    let observed = ln_pmf(a);
    let threshold = observed + (1.0 + 1e-7f64).ln();
    let p: f64 = (low..=high)
        .map(ln_pmf)
        .filter(|&lp| lp <= threshold)
        .map(f64::exp)
        .sum();
    p.min(1.0)
}

/// Benjamini-Hochberg adjusted p-values. Undefined inputs stay undefined and
/// do not count towards the number of tests.
pub fn benjamini_hochberg(pvalues: &[Option<f64>]) -> Vec<Option<f64>> {
    let defined: Vec<usize> = pvalues
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_some_and(|p| !p.is_nan()))
        .map(|(i, _)| i)
        .collect();
    let mut adjusted = vec![None; pvalues.len()];
    let m = defined.len();
    if m == 0 {
        return adjusted;
    }

    let value = |i: usize| pvalues[i].unwrap_or(f64::NAN);
    let mut order = defined;
    order.sort_by(|&i, &j| compare_f64(&value(i), &value(j)).then(i.cmp(&j)));

    let mut running = 1.0f64;
    for (rank0, &idx) in order.iter().enumerate().rev() {
        let scaled = (value(idx) * m as f64 / (rank0 + 1) as f64).min(1.0);
        running = running.min(scaled);
        adjusted[idx] = Some(running);
    }
    adjusted
}

/// Average ranks (1-based) and the tie term `Σ (t³ − t)`.
fn rank_with_ties(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| compare_f64(&values[i], &values[j]));
    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let average = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = average;
        }
        let t = (end - start) as f64;
        tie_term += t * t * t - t;
        start = end;
    }
    (ranks, tie_term)
}

/// Number of arrangements giving each value of U for group sizes (n1, n2).
fn mann_whitney_counts(n1: usize, n2: usize) -> Vec<f64> {
    let mut table: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); n2 + 1]; n1 + 1];
    for i in 0..=n1 {
        for j in 0..=n2 {
            table[i][j] = if i == 0 || j == 0 {
                vec![1.0]
            } else {
                let mut counts = vec![0.0; i * j + 1];
                for (u, &count) in table[i - 1][j].iter().enumerate() {
                    counts[u + j] += count;
                }
                for (u, &count) in table[i][j - 1].iter().enumerate() {
                    counts[u] += count;
                }
                counts
            };
        }
    }
    std::mem::take(&mut table[n1][n2])
}

const MANN_WHITNEY_EXACT_LIMIT: usize = 8;

/// Two-sided Mann-Whitney U test. Returns `(U1, p)`, with `U1` the statistic
/// of the first group, or `None` when either group is empty or the
/// normal approximation has no variance.
pub fn mann_whitney_u(first: &[f64], second: &[f64]) -> Option<(f64, f64)> {
    let n1 = first.len();
    let n2 = second.len();
    if n1 == 0 || n2 == 0 {
        return None;
    }
    let combined: Vec<f64> = first.iter().chain(second).copied().collect();
    let (ranks, tie_term) = rank_with_ties(&combined);
    let rank_sum: f64 = ranks[..n1].iter().sum();
    let u1 = rank_sum - (n1 * (n1 + 1)) as f64 / 2.0;
    let product = (n1 * n2) as f64;
    let u = u1.max(product - u1);

    let p = if n1 <= MANN_WHITNEY_EXACT_LIMIT && n2 <= MANN_WHITNEY_EXACT_LIMIT && tie_term == 0.0
    {
        let counts = mann_whitney_counts(n1, n2);
        let total: f64 = counts.iter().sum();
        let at_least = counts.iter().skip(u.round() as usize).sum::<f64>();
        2.0 * at_least / total
    } else {
        let n = (n1 + n2) as f64;
        let variance = product / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
        if variance.is_nan() || variance <= 0.0 {
            return None;
        }
        let z = (u - product / 2.0 - 0.5) / variance.sqrt();
        2.0 * standard_normal()?.sf(z)
    };
    Some((u1, p.clamp(0.0, 1.0)))
}

/// Asymptotic Kolmogorov distribution survival function `Q(λ)`.
fn kolmogorov_sf(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    if lambda < 1.18 {
        let factor = (2.0 * PI).sqrt() / lambda;
        let exponent = -PI * PI / (8.0 * lambda * lambda);
        let series: f64 = (1..=20)
            .map(|k| ((2 * k - 1) as f64).powi(2) * exponent)
            .map(f64::exp)
            .sum();
        (1.0 - factor * series).clamp(0.0, 1.0)
    } else {
        let mut sum = 0.0;
        for k in 1..=100 {
            let term = (-2.0 * (k * k) as f64 * lambda * lambda).exp();
            sum += if k % 2 == 1 { term } else { -term };
            if term < 1e-16 {
                break;
            }
        }
        (2.0 * sum).clamp(0.0, 1.0)
    }
}

/// One-sample Kolmogorov-Smirnov test against N(0, 1). Returns `(D, p)`.
pub fn ks_test_standard_normal(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let normal = standard_normal()?;
    let mut sorted = values.to_vec();
    sorted.sort_by(compare_f64);
    let n = sorted.len() as f64;
    let d = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let cdf = normal.cdf(x);
            ((i + 1) as f64 / n - cdf).max(cdf - i as f64 / n)
        })
        .fold(0.0f64, f64::max);
    let root = n.sqrt();
    let lambda = (root + 0.12 + 0.11 / root) * d;
    Some((d, kolmogorov_sf(lambda)))
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

const SW_C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
const SW_C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const SW_C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const SW_C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const SW_C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const SW_C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const SW_G: [f64; 2] = [-2.273, 0.459];

/// Shapiro-Wilk normality test for 3 ≤ n ≤ 5000. Returns `(W, p)`.
pub fn shapiro_wilk(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if !(3..=5000).contains(&n) || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut x = values.to_vec();
    x.sort_by(compare_f64);
    let range = x[n - 1] - x[0];
    if range <= 0.0 {
        return None;
    }

    let half = n / 2;
    let nf = n as f64;
    let mut a = vec![0.0; half];
    if n == 3 {
        a[0] = 0.5f64.sqrt();
    } else {
        let normal = standard_normal()?;
        let m: Vec<f64> = (1..=half)
            .map(|i| normal.inverse_cdf((i as f64 - 0.375) / (nf + 0.25)))
            .collect();
        let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        let ssumm2 = summ2.sqrt();
        let rsn = 1.0 / nf.sqrt();
        let a1 = poly(&SW_C1, rsn) - m[0] / ssumm2;

        let (first_free, fac) = if n > 5 {
            let a2 = -m[1] / ssumm2 + poly(&SW_C2, rsn);
            a[1] = a2;
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
                .sqrt();
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
            (1, fac)
        };
        a[0] = a1;
        for i in first_free..half {
            a[i] = -m[i] / fac;
        }
    }

    let mean_x = mean(&x)?;
    let ssq: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    let numerator: f64 = (0..half).map(|i| a[i] * (x[n - 1 - i] - x[i])).sum();
    let w = (numerator * numerator / ssq).min(1.0);

    if n == 3 {
        let pi6 = 6.0 / PI;
        let stqr = PI / 3.0;
        let p = (pi6 * (w.sqrt().asin() - stqr)).max(0.0);
        return Some((w, p.min(1.0)));
    }
    if w >= 1.0 {
        return Some((w, 1.0));
    }

    let mut w1 = (1.0 - w).ln();
    let (location, scale) = if n <= 11 {
        let gamma = poly(&SW_G, nf);
        if w1 >= gamma {
            return Some((w, 1e-99));
        }
        w1 = -(gamma - w1).ln();
        (poly(&SW_C3, nf), poly(&SW_C4, nf).exp())
    } else {
        let ln_n = nf.ln();
        (poly(&SW_C5, ln_n), poly(&SW_C6, ln_n).exp())
    };
    let p = standard_normal()?.sf((w1 - location) / scale);
    Some((w, p))
}
