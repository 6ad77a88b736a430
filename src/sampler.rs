//! Weighted resampling of the support grid and cross-project aggregation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationSettings, CalibrationWarning, LogNormalCalibration};
use crate::estimate::ProjectEstimate;
use crate::grid::SupportGrid;
use crate::models::{build_model, CostModel, ModelKind};
use crate::EngineError;

pub const DEFAULT_DRAWS: usize = 10_000;

/// What to do when a single project cannot be sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the project from the aggregate and report it.
    #[default]
    Omit,
    /// Fail the whole run on the first failing project.
    Abort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Omit => f.write_str("omit"),
            FailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "omit" => Ok(FailurePolicy::Omit),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown failure policy '{other}'. valid policies: omit,abort"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub draws: usize,
    pub seed: u64,
    pub policy: FailurePolicy,
    pub strict_calibration: bool,
    pub calibration: CalibrationSettings,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            draws: DEFAULT_DRAWS,
            seed: 123,
            policy: FailurePolicy::Omit,
            strict_calibration: false,
            calibration: CalibrationSettings::default(),
        }
    }
}

/// One project's draws under one model.
#[derive(Debug, Clone)]
pub struct ProjectDraw {
    pub project_id: String,
    pub model: ModelKind,
    pub seed: u64,
    pub samples: Vec<f64>,
    /// Share of the draws that fell inside `[low, high]`.
    pub inside_range_share: f64,
    pub calibration: Option<LogNormalCalibration>,
}

impl ProjectDraw {
    pub fn into_parts(self) -> (ProjectDiagnostics, Vec<f64>) {
        (
            ProjectDiagnostics {
                project_id: self.project_id,
                seed: self.seed,
                inside_range_share: self.inside_range_share,
                calibration: self.calibration,
            },
            self.samples,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDiagnostics {
    pub project_id: String,
    pub seed: u64,
    pub inside_range_share: f64,
    pub calibration: Option<LogNormalCalibration>,
}

/// A project dropped from the aggregate under [`FailurePolicy::Omit`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectFailure {
    pub project_id: String,
    pub reason: String,
}

/// Projects x draws. Column `k` only pairs draws for summation; rows are
/// sampled independently.
#[derive(Debug, Clone, Default)]
pub struct SampleMatrix {
    draws: usize,
    project_ids: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl SampleMatrix {
    pub fn new(draws: usize) -> Self {
        Self {
            draws,
            project_ids: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, project_id: String, row: Vec<f64>) -> Result<(), EngineError> {
        if row.len() != self.draws {
            return Err(EngineError::LengthMismatch {
                context: "sample matrix row",
                expected: self.draws,
                got: row.len(),
            });
        }
        self.project_ids.push(project_id);
        self.rows.push(row);
        Ok(())
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    pub fn project_ids(&self) -> &[String] {
        &self.project_ids
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, project_id: &str) -> Option<&[f64]> {
        self.project_ids
            .iter()
            .position(|id| id == project_id)
            .map(|idx| self.rows[idx].as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `total[k] = sum over projects of row[k]`.
    pub fn total_cost(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.draws];
        for row in &self.rows {
            for (acc, value) in total.iter_mut().zip(row) {
                *acc += value;
            }
        }
        total
    }
}

/// Aggregate of one model over a batch of projects.
#[derive(Debug, Clone)]
pub struct PortfolioSimulation {
    pub model: ModelKind,
    pub grid: SupportGrid,
    pub matrix: SampleMatrix,
    pub total: Vec<f64>,
    pub projects: Vec<ProjectDiagnostics>,
    pub failures: Vec<ProjectFailure>,
    pub warnings: Vec<CalibrationWarning>,
}

/// Per-project sub-seed. Depends only on the master seed and the project
/// id, never on scheduling.
pub fn derive_seed(master_seed: u64, project_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = project_id.bytes().fold(FNV_OFFSET, |acc, byte| {
        (acc ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    splitmix64(master_seed ^ hash)
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Draws `draws` grid values with probability proportional to `weights`.
/// Returns `None` when the weights cannot be normalized.
pub fn draw_from_weights<R: Rng + ?Sized>(
    weights: &[f64],
    grid: &SupportGrid,
    draws: usize,
    rng: &mut R,
) -> Option<Vec<f64>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return None;
    }
    let index = WeightedIndex::new(weights).ok()?;
    Some(
        (0..draws)
            .map(|_| grid.value(index.sample(rng)))
            .collect(),
    )
}

/// Samples one project under `model` using a generator seeded with `seed`.
pub fn sample_project(
    model: &dyn CostModel,
    estimate: &ProjectEstimate,
    grid: &SupportGrid,
    draws: usize,
    seed: u64,
) -> Result<ProjectDraw, EngineError> {
    if draws == 0 {
        return Err(EngineError::InvalidConfig(
            "draws must be greater than zero".to_string(),
        ));
    }
    estimate.validate()?;

    if !grid.covers(estimate) {
        warn!(
            project = %estimate.id,
            high = estimate.high,
            grid_upper = grid.upper(),
            "support grid truncates the upper tail"
        );
    }

    let evaluation = model.evaluate(estimate, grid)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let samples = draw_from_weights(&evaluation.weights, grid, draws, &mut rng).ok_or_else(|| {
        EngineError::DegenerateDistribution {
            id: estimate.id.clone(),
            model: model.kind(),
            low: estimate.low,
            central: estimate.central,
            high: estimate.high,
        }
    })?;

    let inside = samples.iter().filter(|&&x| estimate.contains(x)).count();
    let inside_range_share = inside as f64 / draws as f64;

    debug!(
        project = %estimate.id,
        model = %model.kind(),
        seed,
        inside_range_share,
        "sampled project"
    );

    Ok(ProjectDraw {
        project_id: estimate.id.clone(),
        model: model.kind(),
        seed,
        samples,
        inside_range_share,
        calibration: evaluation.calibration,
    })
}

/// Samples every project under `kind` in parallel and sums the draws per
/// scenario index.
///
/// Per-project failures are isolated: under [`FailurePolicy::Omit`] the
/// project is dropped and reported, under [`FailurePolicy::Abort`] the first
/// failure in input order is returned.
pub fn simulate_portfolio(
    estimates: &[ProjectEstimate],
    kind: ModelKind,
    settings: &SamplerSettings,
) -> Result<PortfolioSimulation, EngineError> {
    if estimates.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    if settings.draws == 0 {
        return Err(EngineError::InvalidConfig(
            "draws must be greater than zero".to_string(),
        ));
    }
    ensure_unique_ids(estimates)?;

    let mut failures = Vec::new();
    let mut valid = Vec::with_capacity(estimates.len());
    for estimate in estimates {
        match estimate.validate() {
            Ok(()) => valid.push(estimate),
            Err(error) => record_failure(settings.policy, kind, error, &mut failures)?,
        }
    }

    let grid = SupportGrid::from_highs(valid.iter().map(|estimate| estimate.high))?;
    let model = build_model(kind, &settings.calibration);

    let results: Vec<Result<ProjectDraw, EngineError>> = valid
        .par_iter()
        .map(|estimate| {
            let seed = derive_seed(settings.seed, &estimate.id);
            sample_project(model.as_ref(), estimate, &grid, settings.draws, seed)
        })
        .collect();

    let mut matrix = SampleMatrix::new(settings.draws);
    let mut projects = Vec::with_capacity(results.len());
    let mut warnings = Vec::new();

    for result in results {
        let draw = match result {
            Ok(draw) => draw,
            Err(error) => {
                record_failure(settings.policy, kind, error, &mut failures)?;
                continue;
            }
        };

        if let Some(warning) = draw.calibration.as_ref().and_then(|c| c.warning.clone()) {
            if settings.strict_calibration {
                record_failure(settings.policy, kind, warning.into_error(), &mut failures)?;
                continue;
            }
            warn!(
                project = %warning.project_id,
                achieved_coverage = warning.achieved_coverage,
                target = warning.target,
                "log-normal calibration imprecise"
            );
            warnings.push(warning);
        }

        let (diagnostics, samples) = draw.into_parts();
        matrix.push_row(diagnostics.project_id.clone(), samples)?;
        projects.push(diagnostics);
    }

    if matrix.is_empty() {
        return Err(EngineError::EmptyBatch);
    }

    let total = matrix.total_cost();
    info!(
        model = %kind,
        projects = projects.len(),
        omitted = failures.len(),
        draws = settings.draws,
        "simulated portfolio"
    );

    Ok(PortfolioSimulation {
        model: kind,
        grid,
        matrix,
        total,
        projects,
        failures,
        warnings,
    })
}

fn ensure_unique_ids(estimates: &[ProjectEstimate]) -> Result<(), EngineError> {
    let mut seen = BTreeSet::new();
    for estimate in estimates {
        if !seen.insert(estimate.id.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate project id '{}'",
                estimate.id
            )));
        }
    }
    Ok(())
}

fn record_failure(
    policy: FailurePolicy,
    kind: ModelKind,
    error: EngineError,
    failures: &mut Vec<ProjectFailure>,
) -> Result<(), EngineError> {
    if policy == FailurePolicy::Abort {
        return Err(error);
    }

    let project_id = error.project_id().unwrap_or("<unknown>").to_string();
    warn!(project = %project_id, model = %kind, %error, "omitting project");
    failures.push(ProjectFailure {
        project_id,
        reason: error.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{
        derive_seed, sample_project, simulate_portfolio, FailurePolicy, SampleMatrix,
        SamplerSettings,
    };
    use crate::estimate::ProjectEstimate;
    use crate::grid::SupportGrid;
    use crate::models::{ModelKind, NormalMean, NormalModel, UniformModel};
    use crate::EngineError;

    fn scenario() -> Vec<ProjectEstimate> {
        vec![
            ProjectEstimate::new("alpha", 50.0, 120.0, 250.0).unwrap(),
            ProjectEstimate::new("beta", 80.0, 150.0, 300.0).unwrap(),
            ProjectEstimate::new("gamma", 40.0, 90.0, 200.0).unwrap(),
        ]
    }

    fn settings(draws: usize) -> SamplerSettings {
        SamplerSettings {
            draws,
            ..SamplerSettings::default()
        }
    }

    #[test]
    fn uniform_samples_stay_inside_range() {
        let estimates = vec![
            ProjectEstimate::new("a", 50.0, 120.0, 250.0).unwrap(),
            ProjectEstimate::new("b", 10.5, 12.0, 20.2).unwrap(),
        ];
        let grid = SupportGrid::build(&estimates).unwrap();

        for (idx, estimate) in estimates.iter().enumerate() {
            let draw = sample_project(&UniformModel, estimate, &grid, 5_000, idx as u64).unwrap();
            assert_eq!(draw.samples.len(), 5_000);
            assert!(draw.samples.iter().all(|&x| estimate.contains(x)));
            assert_eq!(draw.inside_range_share, 1.0);
        }
    }

    #[test]
    fn normal_with_central_mean_converges_to_central() {
        let estimates = vec![
            ProjectEstimate::new("a", 400.0, 500.0, 600.0).unwrap(),
            ProjectEstimate::new("b", 50.0, 120.0, 250.0).unwrap(),
        ];
        let grid = SupportGrid::build(&estimates).unwrap();
        let model = NormalModel::new(NormalMean::Central);

        let draw = sample_project(&model, &estimates[0], &grid, 100_000, 7).unwrap();
        let mean = draw.samples.iter().sum::<f64>() / draw.samples.len() as f64;
        assert_abs_diff_eq!(mean, 500.0, epsilon = 1.0);
    }

    #[test]
    fn degenerate_weights_are_rejected() {
        // No integer lies inside [10.2, 10.7].
        let estimate = ProjectEstimate::new("thin", 10.2, 10.5, 10.7).unwrap();
        let grid = SupportGrid::with_upper(20).unwrap();
        let err = sample_project(&UniformModel, &estimate, &grid, 100, 1).unwrap_err();
        assert!(err
            .to_string()
            .contains("low=10.2, central=10.5, high=10.7"));
        assert!(matches!(
            err,
            EngineError::DegenerateDistribution {
                ref id,
                model: ModelKind::Uniform,
                low,
                central,
                high,
            } if id == "thin" && (low, central, high) == (10.2, 10.5, 10.7)
        ));
    }

    #[test]
    fn total_is_column_sum_of_matrix() {
        let sim = simulate_portfolio(&scenario(), ModelKind::LogNormal, &settings(2_000)).unwrap();

        assert_eq!(sim.total.len(), 2_000);
        assert_eq!(sim.matrix.rows().len(), 3);
        for k in 0..sim.total.len() {
            let expected: f64 = sim.matrix.rows().iter().map(|row| row[k]).sum();
            assert_eq!(sim.total[k], expected);
        }
    }

    #[test]
    fn simulation_is_reproducible_for_a_seed() {
        let a = simulate_portfolio(&scenario(), ModelKind::Uniform, &settings(1_000)).unwrap();
        let b = simulate_portfolio(&scenario(), ModelKind::Uniform, &settings(1_000)).unwrap();
        assert_eq!(a.total, b.total);

        let other = SamplerSettings {
            seed: 999,
            ..settings(1_000)
        };
        let c = simulate_portfolio(&scenario(), ModelKind::Uniform, &other).unwrap();
        assert_ne!(a.total, c.total);
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let run = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| {
                    simulate_portfolio(&scenario(), ModelKind::NormalNoCentral, &settings(1_000))
                        .unwrap()
                        .total
                })
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn project_rows_do_not_depend_on_batch_order() {
        let forward = simulate_portfolio(&scenario(), ModelKind::Uniform, &settings(500)).unwrap();
        let mut reversed_batch = scenario();
        reversed_batch.reverse();
        let reversed =
            simulate_portfolio(&reversed_batch, ModelKind::Uniform, &settings(500)).unwrap();

        assert_eq!(forward.matrix.row("beta"), reversed.matrix.row("beta"));
    }

    #[test]
    fn omit_policy_drops_invalid_project() {
        let mut estimates = scenario();
        estimates.push(ProjectEstimate {
            id: "flat".to_string(),
            low: 100.0,
            central: 100.0,
            high: 100.0,
        });

        let sim = simulate_portfolio(&estimates, ModelKind::Uniform, &settings(200)).unwrap();
        assert_eq!(sim.projects.len(), 3);
        assert_eq!(sim.failures.len(), 1);
        assert_eq!(sim.failures[0].project_id, "flat");
        // The rejected record does not widen the grid.
        assert_eq!(sim.grid.upper(), 750);
    }

    #[test]
    fn abort_policy_returns_first_failure() {
        let mut estimates = scenario();
        estimates.insert(
            1,
            ProjectEstimate {
                id: "flat".to_string(),
                low: 100.0,
                central: 100.0,
                high: 100.0,
            },
        );
        let abort = SamplerSettings {
            policy: FailurePolicy::Abort,
            ..settings(200)
        };

        let err = simulate_portfolio(&estimates, ModelKind::Uniform, &abort).unwrap_err();
        assert!(matches!(err, EngineError::InvalidEstimateOrder { ref id, .. } if id == "flat"));
    }

    #[test]
    fn strict_calibration_turns_warning_into_failure() {
        let estimates = vec![
            ProjectEstimate::new("ok", 50.0, 120.0, 250.0).unwrap(),
            ProjectEstimate::new("wide", 1.0, 500.0, 100_000.0).unwrap(),
        ];

        let lenient = simulate_portfolio(&estimates, ModelKind::LogNormal, &settings(200)).unwrap();
        assert_eq!(lenient.warnings.len(), 1);
        assert_eq!(lenient.projects.len(), 2);

        let strict = SamplerSettings {
            strict_calibration: true,
            ..settings(200)
        };
        let sim = simulate_portfolio(&estimates, ModelKind::LogNormal, &strict).unwrap();
        assert_eq!(sim.projects.len(), 1);
        assert_eq!(sim.failures[0].project_id, "wide");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut estimates = scenario();
        estimates.push(estimates[0].clone());
        assert!(matches!(
            simulate_portfolio(&estimates, ModelKind::Uniform, &settings(10)),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn matrix_rejects_ragged_rows() {
        let mut matrix = SampleMatrix::new(3);
        matrix.push_row("a".to_string(), vec![1.0, 2.0, 3.0]).unwrap();
        let err = matrix.push_row("b".to_string(), vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::LengthMismatch {
                expected: 3,
                got: 1,
                ..
            }
        ));
        assert_eq!(matrix.total_cost(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn sub_seeds_depend_on_master_and_id() {
        assert_eq!(derive_seed(123, "alpha"), derive_seed(123, "alpha"));
        assert_ne!(derive_seed(123, "alpha"), derive_seed(123, "beta"));
        assert_ne!(derive_seed(123, "alpha"), derive_seed(124, "alpha"));
    }

    #[test]
    fn policy_parses_from_str() {
        assert_eq!("Abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert!("skip".parse::<FailurePolicy>().is_err());
    }
}
