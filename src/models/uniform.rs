use crate::estimate::ProjectEstimate;
use crate::grid::SupportGrid;
use crate::models::{CostModel, ModelEvaluation, ModelKind};
use crate::EngineError;

/// Flat weight over `[low, high]`, zero elsewhere. Ignores `central`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformModel;

impl CostModel for UniformModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Uniform
    }

    fn evaluate(
        &self,
        estimate: &ProjectEstimate,
        grid: &SupportGrid,
    ) -> Result<ModelEvaluation, EngineError> {
        if estimate.low.is_nan() || estimate.high.is_nan() || estimate.low >= estimate.high {
            return Err(EngineError::InvalidRange {
                id: estimate.id.clone(),
                model: self.kind(),
                low: estimate.low,
                high: estimate.high,
            });
        }

        let weights = grid
            .points()
            .map(|x| if estimate.contains(x) { 1.0 } else { 0.0 })
            .collect();
        Ok(ModelEvaluation::plain(weights))
    }
}
