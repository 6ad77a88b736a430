use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Analyst three-point cost estimate for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEstimate {
    pub id: String,
    pub low: f64,
    pub central: f64,
    pub high: f64,
}

impl ProjectEstimate {
    /// Builds a validated estimate.
    pub fn new(
        id: impl Into<String>,
        low: f64,
        central: f64,
        high: f64,
    ) -> Result<Self, EngineError> {
        let estimate = Self {
            id: id.into(),
            low,
            central,
            high,
        };
        estimate.validate()?;
        Ok(estimate)
    }

    /// Checks that every field is a positive finite value and that
    /// `low < central < high` holds strictly. Records are never repaired.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("low", self.low),
            ("central", self.central),
            ("high", self.high),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidEstimateValue {
                    id: self.id.clone(),
                    field,
                    value,
                });
            }
        }

        if self.low >= self.central || self.central >= self.high {
            return Err(EngineError::InvalidEstimateOrder {
                id: self.id.clone(),
                low: self.low,
                central: self.central,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    pub fn spread(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}
