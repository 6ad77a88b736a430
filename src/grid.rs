use crate::estimate::ProjectEstimate;
use crate::EngineError;

/// Largest grid the engine will allocate weights for.
pub const MAX_GRID_POINTS: u64 = 50_000_000;

/// Integer-valued candidate costs `0..=upper`, step 1.
///
/// One grid is shared read-only by every project and model in a run so that
/// weight vectors are directly comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportGrid {
    upper: u64,
}

impl SupportGrid {
    /// Grid bounded by the sum of every project's `high` estimate.
    pub fn build(estimates: &[ProjectEstimate]) -> Result<Self, EngineError> {
        Self::from_highs(estimates.iter().map(|estimate| estimate.high))
    }

    pub fn from_highs<I>(highs: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0_usize;
        let total_high: f64 = highs.into_iter().inspect(|_| count += 1).sum();
        if count == 0 {
            return Err(EngineError::EmptyBatch);
        }
        if !total_high.is_finite() || total_high < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "sum of high estimates is not a usable grid bound: {total_high}"
            )));
        }

        Self::with_upper(total_high.ceil() as u64)
    }

    pub fn with_upper(upper: u64) -> Result<Self, EngineError> {
        if upper >= MAX_GRID_POINTS {
            return Err(EngineError::InvalidConfig(format!(
                "support grid of {} points exceeds the limit of {MAX_GRID_POINTS}",
                upper.saturating_add(1)
            )));
        }
        Ok(Self { upper })
    }

    pub fn upper(&self) -> u64 {
        self.upper
    }

    pub fn len(&self) -> usize {
        self.upper as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Cost value at grid index `idx`.
    pub fn value(&self, idx: usize) -> f64 {
        idx as f64
    }

    pub fn points(&self) -> impl Iterator<Item = f64> + '_ {
        (0..=self.upper).map(|x| x as f64)
    }

    /// Whether the whole `[low, high]` range lies on the grid. Mass above
    /// `upper` is silently truncated by the models.
    pub fn covers(&self, estimate: &ProjectEstimate) -> bool {
        estimate.high <= self.upper as f64
    }
}
