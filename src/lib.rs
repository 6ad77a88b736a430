//! Portfolio cost uncertainty by Monte Carlo aggregation.
//!
//! Each project carries a `(low, central, high)` cost estimate. One of four
//! distribution models turns the estimate into relative likelihoods over a
//! shared integer support grid, the sampler resamples that grid per project,
//! and the per-scenario sums form the total-cost sample from which
//! highest-density intervals are extracted.

pub mod calibration;
pub mod config;
pub mod engine;
pub mod estimate;
pub mod grid;
pub mod interval;
pub mod io;
pub mod models;
pub mod sampler;
pub mod synthetic;

use thiserror::Error;

pub use calibration::{
    calibrate_lognormal, minimize_bounded, CalibrationSettings, CalibrationWarning,
    LogNormalCalibration, LogNormalParams, Minimum,
};
pub use config::{EngineConfig, IntervalMethod};
pub use engine::{
    run_engine, summarize_run, EngineRun, IntervalRecord, ModelRun, ModelSummary, RunSummary,
};
pub use estimate::ProjectEstimate;
pub use grid::SupportGrid;
pub use interval::{
    hdi, hdi_levels, level_set_hdi, level_set_hdi_levels, CredibleInterval, IntervalSegment,
};
pub use models::{build_model, parse_models, CostModel, ModelEvaluation, ModelKind};
pub use sampler::{
    derive_seed, sample_project, simulate_portfolio, FailurePolicy, PortfolioSimulation,
    ProjectDiagnostics, ProjectDraw, ProjectFailure, SampleMatrix, SamplerSettings,
};
pub use synthetic::synthetic_portfolio;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    #[error(
        "project {id}: estimates must satisfy low < central < high \
         (low={low}, central={central}, high={high})"
    )]
    InvalidEstimateOrder {
        id: String,
        low: f64,
        central: f64,
        high: f64,
    },
    #[error("project {id}: {field} must be finite and > 0, got {value}")]
    InvalidEstimateValue {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("project {id}: {model} model rejects range low={low}, high={high}")]
    InvalidRange {
        id: String,
        model: ModelKind,
        low: f64,
        high: f64,
    },
    #[error(
        "project {id}: {model} model produced no positive finite weight on the support grid \
         (low={low}, central={central}, high={high})"
    )]
    DegenerateDistribution {
        id: String,
        model: ModelKind,
        low: f64,
        central: f64,
        high: f64,
    },
    #[error(
        "project {id}: log-normal calibration reached coverage {achieved_coverage:.4} \
         against target {target:.4} (mu={mu}, sigma={sigma})"
    )]
    CalibrationImprecise {
        id: String,
        mu: f64,
        sigma: f64,
        achieved_coverage: f64,
        target: f64,
    },
    #[error(
        "project {id}: log-normal calibration did not converge within {iterations} iterations \
         (low={low}, central={central}, high={high})"
    )]
    CalibrationTimeout {
        id: String,
        iterations: usize,
        low: f64,
        central: f64,
        high: f64,
    },
    #[error("estimate batch is empty")]
    EmptyBatch,
    #[error("sample vector is empty or contains non-finite values")]
    EmptySample,
    #[error("confidence level {level} must lie in (0, 1]")]
    InvalidConfidence { level: f64 },
}

impl EngineError {
    /// Project the error is scoped to, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            EngineError::InvalidEstimateOrder { id, .. }
            | EngineError::InvalidEstimateValue { id, .. }
            | EngineError::InvalidRange { id, .. }
            | EngineError::DegenerateDistribution { id, .. }
            | EngineError::CalibrationImprecise { id, .. }
            | EngineError::CalibrationTimeout { id, .. } => Some(id),
            _ => None,
        }
    }
}
