use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationSettings, LogNormalCalibration};
use crate::estimate::ProjectEstimate;
use crate::grid::SupportGrid;
use crate::EngineError;

pub mod lognormal;
pub mod normal;
pub mod uniform;

pub use lognormal::LogNormalModel;
pub use normal::{NormalMean, NormalModel};
pub use uniform::UniformModel;

pub const MODEL_ORDER: [&str; 4] = [
    "uniform",
    "normal_no_central",
    "normal_with_central",
    "lognormal",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Uniform,
    NormalNoCentral,
    NormalWithCentral,
    #[serde(rename = "lognormal")]
    LogNormal,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Uniform,
        ModelKind::NormalNoCentral,
        ModelKind::NormalWithCentral,
        ModelKind::LogNormal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Uniform => MODEL_ORDER[0],
            ModelKind::NormalNoCentral => MODEL_ORDER[1],
            ModelKind::NormalWithCentral => MODEL_ORDER[2],
            ModelKind::LogNormal => MODEL_ORDER[3],
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.trim().to_lowercase();
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "unknown model '{name}'. valid models: {}",
                    MODEL_ORDER.join(",")
                ))
            })
    }
}

/// Unnormalized per-grid-point likelihoods for one project, plus the
/// calibration that produced them when the model needs one.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub weights: Vec<f64>,
    pub calibration: Option<LogNormalCalibration>,
}

impl ModelEvaluation {
    pub fn plain(weights: Vec<f64>) -> Self {
        Self {
            weights,
            calibration: None,
        }
    }
}

/// A cost model answers one query: the relative likelihood of every grid
/// point for a given project estimate. Weights need not be normalized.
pub trait CostModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn evaluate(
        &self,
        estimate: &ProjectEstimate,
        grid: &SupportGrid,
    ) -> Result<ModelEvaluation, EngineError>;
}

pub fn build_model(kind: ModelKind, calibration: &CalibrationSettings) -> Box<dyn CostModel> {
    match kind {
        ModelKind::Uniform => Box::new(UniformModel),
        ModelKind::NormalNoCentral => Box::new(NormalModel::new(NormalMean::Midpoint)),
        ModelKind::NormalWithCentral => Box::new(NormalModel::new(NormalMean::Central)),
        ModelKind::LogNormal => Box::new(LogNormalModel::new(*calibration)),
    }
}

/// Parses a comma-separated model list into canonical order without
/// duplicates.
pub fn parse_models(raw: &str) -> Result<Vec<ModelKind>, EngineError> {
    let requested = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ModelKind::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if requested.is_empty() {
        return Err(EngineError::InvalidConfig(
            "models list cannot be empty".to_string(),
        ));
    }

    Ok(canonical_models(&requested))
}

pub fn canonical_models(requested: &[ModelKind]) -> Vec<ModelKind> {
    ModelKind::ALL
        .into_iter()
        .filter(|kind| requested.contains(kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{build_model, parse_models, ModelKind};
    use crate::calibration::CalibrationSettings;
    use crate::EngineError;

    #[test]
    fn parse_models_returns_canonical_order() {
        let models = parse_models("lognormal, uniform,lognormal").unwrap();
        assert_eq!(models, vec![ModelKind::Uniform, ModelKind::LogNormal]);
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(matches!(
            parse_models("uniform,beta"),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(parse_models(" , ").is_err());
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.name().parse::<ModelKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.name());
        }
    }

    #[test]
    fn serde_names_match_display_names() {
        for kind in ModelKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn factory_builds_requested_kind() {
        let settings = CalibrationSettings::default();
        for kind in ModelKind::ALL {
            assert_eq!(build_model(kind, &settings).kind(), kind);
        }
    }
}
