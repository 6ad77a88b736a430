use rand::distributions::{Distribution as RandDistribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::LogNormal;

use crate::estimate::ProjectEstimate;
use crate::EngineError;

const MEDIAN_CENTRAL: f64 = 150.0;
const CENTRAL_LOG_SPREAD: f64 = 0.5;
const MIN_CENTRAL: f64 = 10.0;

/// Reproducible batch of `count` well-formed whole-unit estimates with ids
/// `P001`, `P002`, ... Centrals are log-normal around 150; the low and high
/// bounds are drawn as multiples of the central.
pub fn synthetic_portfolio(count: usize, seed: u64) -> Result<Vec<ProjectEstimate>, EngineError> {
    if count == 0 {
        return Err(EngineError::EmptyBatch);
    }

    let central_dist = LogNormal::new(MEDIAN_CENTRAL.ln(), CENTRAL_LOG_SPREAD)
        .map_err(|err| EngineError::InvalidConfig(format!("central distribution: {err}")))?;
    let low_factor = Uniform::new(0.4_f64, 0.9_f64);
    let high_factor = Uniform::new(1.3_f64, 2.5_f64);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    (0..count)
        .map(|idx| {
            let central = central_dist.sample(&mut rng).round().max(MIN_CENTRAL);
            let low = (central * low_factor.sample(&mut rng)).floor();
            let high = (central * high_factor.sample(&mut rng)).ceil();
            ProjectEstimate::new(format!("P{:03}", idx + 1), low, central, high)
        })
        .collect()
}
