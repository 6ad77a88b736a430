use statrs::distribution::{Continuous, Normal};

use crate::estimate::ProjectEstimate;
use crate::grid::SupportGrid;
use crate::models::{CostModel, ModelEvaluation, ModelKind};
use crate::EngineError;

/// `(low, high)` is read as an approximate 95% interval, i.e. +-2 sigma.
pub const SPREAD_TO_SIGMA: f64 = 4.0;

/// Where the Gaussian is centred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalMean {
    /// Midpoint of `(low, high)`; the central estimate is ignored.
    Midpoint,
    /// The analyst's central estimate.
    Central,
}

#[derive(Debug, Clone, Copy)]
pub struct NormalModel {
    mean: NormalMean,
}

impl NormalModel {
    pub fn new(mean: NormalMean) -> Self {
        Self { mean }
    }

    /// `(mean, std_dev)` used for `estimate`.
    pub fn parameters(&self, estimate: &ProjectEstimate) -> (f64, f64) {
        let mean = match self.mean {
            NormalMean::Midpoint => estimate.midpoint(),
            NormalMean::Central => estimate.central,
        };
        (mean, estimate.spread() / SPREAD_TO_SIGMA)
    }
}

impl CostModel for NormalModel {
    fn kind(&self) -> ModelKind {
        match self.mean {
            NormalMean::Midpoint => ModelKind::NormalNoCentral,
            NormalMean::Central => ModelKind::NormalWithCentral,
        }
    }

    fn evaluate(
        &self,
        estimate: &ProjectEstimate,
        grid: &SupportGrid,
    ) -> Result<ModelEvaluation, EngineError> {
        let (mean, std_dev) = self.parameters(estimate);
        let invalid_range = || EngineError::InvalidRange {
            id: estimate.id.clone(),
            model: self.kind(),
            low: estimate.low,
            high: estimate.high,
        };

        if !mean.is_finite() || !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(invalid_range());
        }
        let dist = Normal::new(mean, std_dev).map_err(|_| invalid_range())?;

        let weights = grid.points().map(|x| dist.pdf(x)).collect();
        Ok(ModelEvaluation::plain(weights))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{NormalMean, NormalModel};
    use crate::estimate::ProjectEstimate;
    use crate::grid::SupportGrid;
    use crate::models::{CostModel, ModelKind};

    fn argmax(weights: &[f64]) -> usize {
        weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap()
    }

    #[test]
    fn no_central_variant_peaks_at_midpoint() {
        let estimate = ProjectEstimate::new("p", 50.0, 120.0, 250.0).unwrap();
        let grid = SupportGrid::with_upper(400).unwrap();
        let model = NormalModel::new(NormalMean::Midpoint);

        assert_eq!(model.kind(), ModelKind::NormalNoCentral);
        assert_eq!(model.parameters(&estimate), (150.0, 50.0));

        let eval = model.evaluate(&estimate, &grid).unwrap();
        assert_eq!(eval.weights.len(), grid.len());
        assert_eq!(argmax(&eval.weights), 150);
    }

    #[test]
    fn central_variant_peaks_at_central() {
        let estimate = ProjectEstimate::new("p", 50.0, 120.0, 250.0).unwrap();
        let grid = SupportGrid::with_upper(400).unwrap();
        let model = NormalModel::new(NormalMean::Central);

        assert_eq!(model.kind(), ModelKind::NormalWithCentral);
        let eval = model.evaluate(&estimate, &grid).unwrap();
        assert_eq!(argmax(&eval.weights), 120);
    }

    #[test]
    fn variants_share_the_same_spread() {
        let estimate = ProjectEstimate::new("p", 80.0, 150.0, 300.0).unwrap();
        let (_, sd_mid) = NormalModel::new(NormalMean::Midpoint).parameters(&estimate);
        let (_, sd_central) = NormalModel::new(NormalMean::Central).parameters(&estimate);
        assert_eq!(sd_mid, sd_central);
    }

    #[test]
    fn weights_integrate_to_about_one_on_a_wide_grid() {
        let estimate = ProjectEstimate::new("p", 400.0, 500.0, 600.0).unwrap();
        let grid = SupportGrid::with_upper(1200).unwrap();
        let eval = NormalModel::new(NormalMean::Central)
            .evaluate(&estimate, &grid)
            .unwrap();
        let total: f64 = eval.weights.iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
    }
}
