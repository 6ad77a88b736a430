//! Runs every enabled model over one estimate batch and extracts the
//! credible intervals of each total-cost sample.

use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Median, Min};
use tracing::info;

use crate::calibration::CalibrationWarning;
use crate::config::{EngineConfig, IntervalMethod};
use crate::estimate::ProjectEstimate;
use crate::interval::{hdi_levels, level_set_hdi_levels, CredibleInterval};
use crate::models::ModelKind;
use crate::sampler::{simulate_portfolio, PortfolioSimulation, ProjectDiagnostics, ProjectFailure};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct ModelRun {
    pub model: ModelKind,
    pub simulation: PortfolioSimulation,
    /// One interval per configured confidence level, same order.
    pub intervals: Vec<CredibleInterval>,
}

#[derive(Debug, Clone)]
pub struct EngineRun {
    pub config: EngineConfig,
    pub projects: usize,
    /// Canonical model order.
    pub models: Vec<ModelRun>,
}

impl EngineRun {
    pub fn model(&self, kind: ModelKind) -> Option<&ModelRun> {
        self.models.iter().find(|run| run.model == kind)
    }

    pub fn interval_records(&self) -> Vec<IntervalRecord> {
        self.models
            .iter()
            .flat_map(|run| {
                run.intervals.iter().map(move |interval| IntervalRecord {
                    model: run.model,
                    confidence_level: interval.confidence_level,
                    lower: interval.lower(),
                    upper: interval.upper(),
                    width: interval.width(),
                    segments: interval.segments.len(),
                })
            })
            .collect()
    }
}

/// Flat row of the `intervals.csv` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalRecord {
    pub model: ModelKind,
    pub confidence_level: f64,
    pub lower: f64,
    pub upper: f64,
    pub width: f64,
    pub segments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: ModelKind,
    pub grid_upper: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub intervals: Vec<CredibleInterval>,
    pub projects: Vec<ProjectDiagnostics>,
    pub omitted: Vec<ProjectFailure>,
    pub warnings: Vec<CalibrationWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub draws: usize,
    pub seed: u64,
    pub projects: usize,
    pub interval_method: IntervalMethod,
    pub models: Vec<ModelSummary>,
}

pub fn run_engine(
    estimates: &[ProjectEstimate],
    config: &EngineConfig,
) -> Result<EngineRun, EngineError> {
    config.validate()?;
    let settings = config.sampler_settings();

    let mut models = Vec::new();
    for kind in config.model_order() {
        let simulation = simulate_portfolio(estimates, kind, &settings)?;
        let intervals = match config.interval_method {
            IntervalMethod::Contiguous => {
                hdi_levels(&simulation.total, &config.confidence_levels)?
            }
            IntervalMethod::LevelSet => level_set_hdi_levels(
                &simulation.total,
                &config.confidence_levels,
                config.level_set_bins,
            )?,
        };

        for interval in &intervals {
            info!(
                model = %kind,
                level = interval.confidence_level,
                lower = interval.lower(),
                upper = interval.upper(),
                segments = interval.segments.len(),
                "credible interval"
            );
        }

        models.push(ModelRun {
            model: kind,
            simulation,
            intervals,
        });
    }

    Ok(EngineRun {
        config: config.clone(),
        projects: estimates.len(),
        models,
    })
}

pub fn summarize_run(run: &EngineRun) -> RunSummary {
    let models = run
        .models
        .iter()
        .map(|model_run| {
            let simulation = &model_run.simulation;
            let data = Data::new(simulation.total.clone());
            ModelSummary {
                model: model_run.model,
                grid_upper: simulation.grid.upper(),
                mean: data.mean().unwrap_or(f64::NAN),
                std_dev: data.std_dev().unwrap_or(0.0),
                min: data.min(),
                median: data.median(),
                max: data.max(),
                intervals: model_run.intervals.clone(),
                projects: simulation.projects.clone(),
                omitted: simulation.failures.clone(),
                warnings: simulation.warnings.clone(),
            }
        })
        .collect();

    RunSummary {
        draws: run.config.draws,
        seed: run.config.seed,
        projects: run.projects,
        interval_method: run.config.interval_method,
        models,
    }
}
