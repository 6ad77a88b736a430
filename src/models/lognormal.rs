use crate::calibration::{calibrate_lognormal, CalibrationSettings};
use crate::estimate::ProjectEstimate;
use crate::grid::SupportGrid;
use crate::models::{CostModel, ModelEvaluation, ModelKind};
use crate::EngineError;

/// Right-skewed model; parameters are calibrated per project on every
/// evaluation and never shared between projects.
#[derive(Debug, Clone, Copy)]
pub struct LogNormalModel {
    settings: CalibrationSettings,
}

impl LogNormalModel {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self { settings }
    }
}

impl CostModel for LogNormalModel {
    fn kind(&self) -> ModelKind {
        ModelKind::LogNormal
    }

    fn evaluate(
        &self,
        estimate: &ProjectEstimate,
        grid: &SupportGrid,
    ) -> Result<ModelEvaluation, EngineError> {
        let calibration = calibrate_lognormal(estimate, &self.settings)?;
        let params = calibration.params;
        let weights = grid.points().map(|x| params.pdf(x)).collect();

        Ok(ModelEvaluation {
            weights,
            calibration: Some(calibration),
        })
    }
}
