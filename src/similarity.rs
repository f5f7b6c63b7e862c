use serde::{Deserialize, Serialize};

use crate::histogram::{Channel, Histogram, BINS};

/// Selectable scoring policy for comparing two fingerprints.
///
/// One strategy is active per scan; callers pick it at configuration time
/// together with the matching threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityStrategy {
    /// Total-variation similarity over normalized channels.
    ///
    /// `score` is `1 - (sum of |a - b| over all channels and bins) / 4`,
    /// with each channel normalized by its image's pixel count. Identical
    /// fingerprints score 1.0; a solid-color pair with disjoint red and blue
    /// mass and matching alpha scores 0.0. Higher means more similar, and a
    /// pair matches when `score >= threshold`.
    L1,

    /// Mean p-value of per-channel two-sample chi-square tests on the raw
    /// counts.
    ///
    /// A high p-value means the two count distributions are statistically
    /// indistinguishable. The matching comparator is `score <= threshold`,
    /// so a *small* mean p-value is what flags a pair.
    ChiSquare,
}

impl SimilarityStrategy {
    /// Score two fingerprints. Symmetric in its arguments.
    pub fn score(&self, a: &Histogram, b: &Histogram) -> f64 {
        match self {
            SimilarityStrategy::L1 => l1_similarity(a, b),
            SimilarityStrategy::ChiSquare => chi_square_mean_p(a, b),
        }
    }

    /// Whether an already computed score clears `threshold` for this policy.
    pub fn is_match(&self, score: f64, threshold: f64) -> bool {
        match self {
            SimilarityStrategy::L1 => score >= threshold,
            SimilarityStrategy::ChiSquare => score <= threshold,
        }
    }

    pub fn is_duplicate(&self, a: &Histogram, b: &Histogram, threshold: f64) -> bool {
        self.is_match(self.score(a, b), threshold)
    }
}

fn l1_similarity(a: &Histogram, b: &Histogram) -> f64 {
    let a_total = a.pixel_count() as f64;
    let b_total = b.pixel_count() as f64;

    let mut distance = 0.0;
    for channel in Channel::ALL {
        let xs = a.channel(channel);
        let ys = b.channel(channel);
        for bin in 0..BINS {
            distance += (xs[bin] as f64 / a_total - ys[bin] as f64 / b_total).abs();
        }
    }

    1.0 - distance / Channel::ALL.len() as f64
}

fn chi_square_mean_p(a: &Histogram, b: &Histogram) -> f64 {
    let total: f64 = Channel::ALL
        .iter()
        .map(|&channel| two_sample_p_value(a.channel(channel), b.channel(channel)))
        .sum();
    total / Channel::ALL.len() as f64
}

/// Two-sample chi-square test over one channel's bins, returning the
/// p-value for `BINS - 1` degrees of freedom.
///
/// Bins counting zero in both samples enter the statistic as a 1/1 tie;
/// chi-square is undefined on zero/zero cells, and the tie keeps such bins
/// scoring as perfect agreement. Unequal sample totals are handled with the
/// usual `sqrt(n1/n2)` weighting, so a resized copy of an image still tests
/// as drawn from the same distribution.
fn two_sample_p_value(xs: &[u64; BINS], ys: &[u64; BINS]) -> f64 {
    let mut xs_adj = [0f64; BINS];
    let mut ys_adj = [0f64; BINS];
    for bin in 0..BINS {
        if xs[bin] == 0 && ys[bin] == 0 {
            xs_adj[bin] = 1.0;
            ys_adj[bin] = 1.0;
        } else {
            xs_adj[bin] = xs[bin] as f64;
            ys_adj[bin] = ys[bin] as f64;
        }
    }

    let x_total: f64 = xs_adj.iter().sum();
    let y_total: f64 = ys_adj.iter().sum();
    let ratio = (x_total / y_total).sqrt();

    let mut statistic = 0.0;
    for bin in 0..BINS {
        let dev = xs_adj[bin] / ratio - ys_adj[bin] * ratio;
        statistic += dev * dev / (xs_adj[bin] + ys_adj[bin]);
    }

    chi_square_upper_tail(statistic, (BINS - 1) as f64)
}

/// P(X >= statistic) for a chi-square distribution with `df` degrees of
/// freedom.
fn chi_square_upper_tail(statistic: f64, df: f64) -> f64 {
    regularized_gamma_q(df / 2.0, statistic / 2.0)
}

const MAX_ITERATIONS: usize = 200;
const EPSILON: f64 = 1e-14;
const TINY: f64 = 1e-300;

/// Regularized upper incomplete gamma function Q(a, x).
///
/// Series expansion for x < a + 1, Lentz continued fraction otherwise; both
/// converge in a handful of iterations for the arguments chi-square testing
/// produces.
fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        1.0 - gamma_p_series(a, x)
    } else {
        gamma_q_continued_fraction(a, x)
    }
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut denominator = a;
    let mut term = 1.0 / a;
    let mut sum = term;
    for _ in 0..MAX_ITERATIONS {
        denominator += 1.0;
        term *= x / denominator;
        sum += term;
        if term.abs() < sum.abs() * EPSILON {
            break;
        }
    }
    sum * (a * x.ln() - x - ln_gamma(a)).exp()
}

fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    (a * x.ln() - x - ln_gamma(a)).exp() * h
}

/// Natural log of the gamma function, Lanczos approximation.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut denominator = x;
    let mut series = 1.000_000_000_190_015;
    for coefficient in COEFFICIENTS {
        denominator += 1.0;
        series += coefficient / denominator;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}
