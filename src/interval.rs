//! Highest-density intervals over a sample vector.
//!
//! The contiguous estimator slides a window of `ceil(p * n)` sorted samples
//! and keeps the narrowest. The level-set estimator histograms the samples,
//! keeps the densest bins until `p` of the samples are covered, and returns
//! each run of kept bins as a separate segment, so multi-modal aggregates
//! are not forced into one wide interval. Both are pure functions of the
//! multiset of samples.

use serde::Serialize;

use crate::EngineError;

const COUNT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalSegment {
    pub lower: f64,
    pub upper: f64,
    /// Share of the samples inside this segment.
    pub mass: f64,
}

impl IntervalSegment {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredibleInterval {
    pub confidence_level: f64,
    pub segments: Vec<IntervalSegment>,
}

impl CredibleInterval {
    pub fn lower(&self) -> f64 {
        self.segments.first().map_or(f64::NAN, |s| s.lower)
    }

    pub fn upper(&self) -> f64 {
        self.segments.last().map_or(f64::NAN, |s| s.upper)
    }

    /// Total width of the segments, gaps excluded.
    pub fn width(&self) -> f64 {
        self.segments.iter().map(IntervalSegment::width).sum()
    }

    pub fn mass(&self) -> f64 {
        self.segments.iter().map(|s| s.mass).sum()
    }

    pub fn is_contiguous(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn contains(&self, value: f64) -> bool {
        self.segments
            .iter()
            .any(|s| value >= s.lower && value <= s.upper)
    }
}

/// Narrowest single interval holding at least `level` of the samples.
pub fn hdi(samples: &[f64], level: f64) -> Result<CredibleInterval, EngineError> {
    check_level(level)?;
    let sorted = sorted_finite(samples)?;
    Ok(contiguous_from_sorted(&sorted, level))
}

/// [`hdi`] at several levels, sorting the samples once.
pub fn hdi_levels(samples: &[f64], levels: &[f64]) -> Result<Vec<CredibleInterval>, EngineError> {
    levels.iter().try_for_each(|&level| check_level(level))?;
    let sorted = sorted_finite(samples)?;
    Ok(levels
        .iter()
        .map(|&level| contiguous_from_sorted(&sorted, level))
        .collect())
}

/// Union of intervals from a `bins`-bin histogram level set holding at
/// least `level` of the samples.
pub fn level_set_hdi(
    samples: &[f64],
    level: f64,
    bins: usize,
) -> Result<CredibleInterval, EngineError> {
    Ok(level_set_hdi_levels(samples, &[level], bins)?.remove(0))
}

pub fn level_set_hdi_levels(
    samples: &[f64],
    levels: &[f64],
    bins: usize,
) -> Result<Vec<CredibleInterval>, EngineError> {
    if bins < 2 {
        return Err(EngineError::InvalidConfig(
            "level-set HDI needs at least two bins".to_string(),
        ));
    }
    levels.iter().try_for_each(|&level| check_level(level))?;
    let sorted = sorted_finite(samples)?;
    let histogram = Histogram::new(&sorted, bins);

    Ok(levels
        .iter()
        .map(|&level| level_set_from_sorted(&sorted, &histogram, level))
        .collect())
}

fn check_level(level: f64) -> Result<(), EngineError> {
    if level.is_finite() && level > 0.0 && level <= 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfidence { level })
    }
}

fn sorted_finite(samples: &[f64]) -> Result<Vec<f64>, EngineError> {
    if samples.is_empty() || samples.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::EmptySample);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(sorted)
}

/// Smallest sample count that reaches `level`.
fn required_count(level: f64, n: usize) -> usize {
    ((level * n as f64 - COUNT_EPSILON).ceil() as usize).clamp(1, n)
}

fn contiguous_from_sorted(sorted: &[f64], level: f64) -> CredibleInterval {
    let n = sorted.len();
    let window = required_count(level, n);

    let mut best = 0;
    let mut best_width = f64::INFINITY;
    for start in 0..=(n - window) {
        let width = sorted[start + window - 1] - sorted[start];
        if width < best_width {
            best_width = width;
            best = start;
        }
    }

    CredibleInterval {
        confidence_level: level,
        segments: vec![IntervalSegment {
            lower: sorted[best],
            upper: sorted[best + window - 1],
            mass: window as f64 / n as f64,
        }],
    }
}

struct Histogram {
    /// Bin of each sorted sample; non-decreasing.
    sample_bins: Vec<usize>,
    counts: Vec<usize>,
}

impl Histogram {
    fn new(sorted: &[f64], bins: usize) -> Self {
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let span = max - min;

        let sample_bins: Vec<usize> = sorted
            .iter()
            .map(|&x| {
                if span <= 0.0 {
                    0
                } else {
                    (((x - min) / span * bins as f64).floor() as usize).min(bins - 1)
                }
            })
            .collect();

        let mut counts = vec![0; bins];
        for &bin in &sample_bins {
            counts[bin] += 1;
        }

        Self {
            sample_bins,
            counts,
        }
    }
}

fn level_set_from_sorted(sorted: &[f64], histogram: &Histogram, level: f64) -> CredibleInterval {
    let n = sorted.len();
    let target = required_count(level, n);

    // Densest bins first; ties resolved by position for determinism.
    let mut order: Vec<usize> = (0..histogram.counts.len()).collect();
    order.sort_by(|&a, &b| histogram.counts[b].cmp(&histogram.counts[a]).then(a.cmp(&b)));

    let mut selected = vec![false; histogram.counts.len()];
    let mut covered = 0;
    for bin in order {
        if covered >= target {
            break;
        }
        selected[bin] = true;
        covered += histogram.counts[bin];
    }

    // Consecutive selected bins form one segment, tightened to its samples.
    let mut segments: Vec<IntervalSegment> = Vec::new();
    let mut previous_bin: Option<usize> = None;
    let mut current: Option<(f64, f64, usize)> = None;

    for (&x, &bin) in sorted.iter().zip(&histogram.sample_bins) {
        if !selected[bin] {
            continue;
        }
        let continues_run = previous_bin.map_or(false, |prev| {
            (prev..=bin).all(|b| selected[b])
        });

        current = match current {
            Some((lower, _, count)) if continues_run => Some((lower, x, count + 1)),
            Some(done) => {
                segments.push(segment(done, n));
                Some((x, x, 1))
            }
            None => Some((x, x, 1)),
        };
        previous_bin = Some(bin);
    }
    if let Some(done) = current {
        segments.push(segment(done, n));
    }

    CredibleInterval {
        confidence_level: level,
        segments,
    }
}

fn segment((lower, upper, count): (f64, f64, usize), n: usize) -> IntervalSegment {
    IntervalSegment {
        lower,
        upper,
        mass: count as f64 / n as f64,
    }
}
