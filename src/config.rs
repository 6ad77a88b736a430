use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::calibration::{
    CalibrationSettings, DEFAULT_COVERAGE_TARGET, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE,
    DEFAULT_XTOL,
};
use crate::models::{canonical_models, ModelKind};
use crate::sampler::{FailurePolicy, SamplerSettings, DEFAULT_DRAWS};
use crate::EngineError;

/// How credible intervals are cut from the total-cost sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// Narrowest single interval.
    #[default]
    Contiguous,
    /// Histogram level set; may return several disjoint segments.
    LevelSet,
}

impl std::str::FromStr for IntervalMethod {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "contiguous" => Ok(IntervalMethod::Contiguous),
            "level_set" => Ok(IntervalMethod::LevelSet),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown interval method '{other}'. valid methods: contiguous,level_set"
            ))),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub draws: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub seed: u64,
    pub confidence_levels: Vec<f64>,
    pub sigma_search_bounds: (f64, f64),
    #[serde_as(as = "DefaultOnNull")]
    pub coverage_target: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub calibration_tolerance: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub calibration_max_iterations: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub calibration_xtol: f64,
    pub models: Vec<ModelKind>,
    #[serde_as(as = "DefaultOnNull")]
    pub failure_policy: FailurePolicy,
    #[serde_as(as = "DefaultOnNull")]
    pub strict_calibration: bool,
    #[serde_as(as = "DefaultOnNull")]
    pub interval_method: IntervalMethod,
    #[serde_as(as = "DefaultOnNull")]
    pub level_set_bins: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            draws: DEFAULT_DRAWS,
            seed: 123,
            confidence_levels: vec![0.95, 0.89],
            sigma_search_bounds: (0.0, 1.0),
            coverage_target: DEFAULT_COVERAGE_TARGET,
            calibration_tolerance: DEFAULT_TOLERANCE,
            calibration_max_iterations: DEFAULT_MAX_ITERATIONS,
            calibration_xtol: DEFAULT_XTOL,
            models: ModelKind::ALL.to_vec(),
            failure_policy: FailurePolicy::Omit,
            strict_calibration: false,
            interval_method: IntervalMethod::Contiguous,
            level_set_bins: 100,
        }
    }
}

impl EngineConfig {
    /// Loads a `.toml` or `.json` config and validates it.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        let config: EngineConfig = match extension.as_deref() {
            Some("toml") => toml::from_str(&raw)?,
            Some("json") => serde_json::from_str(&raw)?,
            _ => {
                return Err(EngineError::InvalidConfig(format!(
                    "config file {} must end in .toml or .json",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.draws == 0 {
            return Err(EngineError::InvalidConfig(
                "draws must be greater than zero".to_string(),
            ));
        }

        if self.confidence_levels.is_empty() {
            return Err(EngineError::InvalidConfig(
                "confidence_levels cannot be empty".to_string(),
            ));
        }

        if let Some(&level) = self
            .confidence_levels
            .iter()
            .find(|&&level| !(level.is_finite() && level > 0.0 && level <= 1.0))
        {
            return Err(EngineError::InvalidConfidence { level });
        }

        let (lower, upper) = self.sigma_search_bounds;
        if !lower.is_finite() || !upper.is_finite() || lower < 0.0 || upper <= lower {
            return Err(EngineError::InvalidConfig(format!(
                "sigma_search_bounds must satisfy 0 <= lower < upper, got ({lower}, {upper})"
            )));
        }

        if !(self.coverage_target > 0.0 && self.coverage_target < 1.0) {
            return Err(EngineError::InvalidConfig(
                "coverage_target must lie strictly between 0 and 1".to_string(),
            ));
        }

        if !self.calibration_tolerance.is_finite() || self.calibration_tolerance <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "calibration_tolerance must be finite and > 0".to_string(),
            ));
        }

        if self.calibration_max_iterations == 0 {
            return Err(EngineError::InvalidConfig(
                "calibration_max_iterations must be greater than zero".to_string(),
            ));
        }

        if !self.calibration_xtol.is_finite() || self.calibration_xtol <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "calibration_xtol must be finite and > 0".to_string(),
            ));
        }

        if self.models.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one model must be enabled".to_string(),
            ));
        }

        if self.interval_method == IntervalMethod::LevelSet && self.level_set_bins < 2 {
            return Err(EngineError::InvalidConfig(
                "level_set_bins must be at least 2".to_string(),
            ));
        }

        Ok(())
    }

    /// Enabled models in canonical order.
    pub fn model_order(&self) -> Vec<ModelKind> {
        canonical_models(&self.models)
    }

    pub fn calibration_settings(&self) -> CalibrationSettings {
        CalibrationSettings {
            sigma_bounds: self.sigma_search_bounds,
            coverage_target: self.coverage_target,
            tolerance: self.calibration_tolerance,
            max_iterations: self.calibration_max_iterations,
            xtol: self.calibration_xtol,
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            draws: self.draws,
            seed: self.seed,
            policy: self.failure_policy,
            strict_calibration: self.strict_calibration,
            calibration: self.calibration_settings(),
        }
    }
}
