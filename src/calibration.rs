//! Log-normal parameter calibration.
//!
//! The mode constraint fixes `mu = ln(central) + sigma^2`, leaving a single
//! free parameter. `sigma` is then chosen by bounded 1-D minimization of
//! `|CDF(high) - CDF(low) - target|` so that the requested share of mass
//! falls inside `[low, high]`.

use serde::Serialize;
use statrs::distribution::{Continuous, ContinuousCDF, LogNormal};
use tracing::debug;

use crate::estimate::ProjectEstimate;
use crate::EngineError;

pub const DEFAULT_COVERAGE_TARGET: f64 = 0.95;
pub const DEFAULT_TOLERANCE: f64 = 0.01;
pub const DEFAULT_MAX_ITERATIONS: usize = 500;
pub const DEFAULT_XTOL: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    pub sigma_bounds: (f64, f64),
    pub coverage_target: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub xtol: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            sigma_bounds: (0.0, 1.0),
            coverage_target: DEFAULT_COVERAGE_TARGET,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            xtol: DEFAULT_XTOL,
        }
    }
}

/// Location and scale of the underlying normal in log space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogNormalParams {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormalParams {
    /// Parameters whose mode sits exactly at `central`.
    pub fn with_mode(central: f64, sigma: f64) -> Self {
        Self {
            mu: central.ln() + sigma * sigma,
            sigma,
        }
    }

    pub fn mode(&self) -> f64 {
        (self.mu - self.sigma * self.sigma).exp()
    }

    /// Probability mass inside `[low, high]`. A zero `sigma` is the point
    /// mass at `exp(mu)`.
    pub fn coverage(&self, low: f64, high: f64) -> f64 {
        match self.distribution() {
            Some(dist) => dist.cdf(high) - dist.cdf(low),
            None => {
                let point = self.mu.exp();
                if point >= low && point <= high {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn pdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        self.distribution().map_or(0.0, |dist| dist.pdf(x))
    }

    fn distribution(&self) -> Option<LogNormal> {
        if self.sigma.is_nan() || self.sigma <= 0.0 || !self.mu.is_finite() {
            return None;
        }
        LogNormal::new(self.mu, self.sigma).ok()
    }
}

/// Best-effort parameters for a calibration whose residual exceeded the
/// tolerance. Recoverable: the fit may still be usable as a cost shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationWarning {
    pub project_id: String,
    pub params: LogNormalParams,
    pub achieved_coverage: f64,
    pub target: f64,
}

impl CalibrationWarning {
    pub fn into_error(self) -> EngineError {
        EngineError::CalibrationImprecise {
            id: self.project_id,
            mu: self.params.mu,
            sigma: self.params.sigma,
            achieved_coverage: self.achieved_coverage,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogNormalCalibration {
    pub params: LogNormalParams,
    pub achieved_coverage: f64,
    pub residual: f64,
    pub iterations: usize,
    pub warning: Option<CalibrationWarning>,
}

/// Result of a bounded scalar minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum {
    pub x: f64,
    pub fx: f64,
    pub iterations: usize,
}

/// Minimizer ran out of iterations before the bracket shrank below `xtol`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotConverged {
    pub best: Minimum,
}

/// Brent's bounded minimization: golden-section steps with parabolic
/// interpolation whenever the parabola stays inside the bracket.
pub fn minimize_bounded<F>(
    mut f: F,
    lower: f64,
    upper: f64,
    xtol: f64,
    max_iterations: usize,
) -> Result<Minimum, NotConverged>
where
    F: FnMut(f64) -> f64,
{
    let golden = 0.5 * (3.0 - 5.0_f64.sqrt());
    let sqrt_eps = f64::EPSILON.sqrt();

    let (mut a, mut b) = (lower, upper);
    let mut fulc = a + golden * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat = 0.0_f64;
    let mut e = 0.0_f64;

    let mut fx = f(xf);
    let mut ffulc = fx;
    let mut fnfc = fx;

    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + xtol / 3.0;
    let mut tol2 = 2.0 * tol1;
    let mut iterations = 0;

    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        if iterations >= max_iterations {
            return Err(NotConverged {
                best: Minimum {
                    x: xf,
                    fx,
                    iterations,
                },
            });
        }
        iterations += 1;

        let mut golden_step = true;
        if e.abs() > tol1 {
            golden_step = false;
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    rat = tol1 * sign_or_one(xm - xf);
                }
            } else {
                golden_step = true;
            }
        }

        if golden_step {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden * e;
        }

        let x = xf + sign_or_one(rat) * rat.abs().max(tol1);
        let fu = f(x);

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + xtol / 3.0;
        tol2 = 2.0 * tol1;
    }

    Ok(Minimum {
        x: xf,
        fx,
        iterations,
    })
}

fn sign_or_one(value: f64) -> f64 {
    if value < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Fits `(mu, sigma)` so that the mode equals `central` and roughly
/// `coverage_target` of the mass lies within `[low, high]`.
///
/// Deterministic for identical inputs and settings.
pub fn calibrate_lognormal(
    estimate: &ProjectEstimate,
    settings: &CalibrationSettings,
) -> Result<LogNormalCalibration, EngineError> {
    estimate.validate()?;

    let (sigma_lo, sigma_hi) = settings.sigma_bounds;
    if !(sigma_lo.is_finite() && sigma_hi.is_finite() && sigma_lo >= 0.0 && sigma_lo < sigma_hi) {
        return Err(EngineError::InvalidConfig(format!(
            "sigma search bounds must satisfy 0 <= lo < hi, got ({sigma_lo}, {sigma_hi})"
        )));
    }

    let objective = |sigma: f64| {
        let params = LogNormalParams::with_mode(estimate.central, sigma.max(0.0));
        (params.coverage(estimate.low, estimate.high) - settings.coverage_target).abs()
    };

    let minimum = minimize_bounded(
        objective,
        sigma_lo,
        sigma_hi,
        settings.xtol,
        settings.max_iterations,
    )
    .map_err(|_| EngineError::CalibrationTimeout {
        id: estimate.id.clone(),
        iterations: settings.max_iterations,
        low: estimate.low,
        central: estimate.central,
        high: estimate.high,
    })?;

    let params = LogNormalParams::with_mode(estimate.central, minimum.x.max(0.0));
    let achieved_coverage = params.coverage(estimate.low, estimate.high);
    let residual = (achieved_coverage - settings.coverage_target).abs();

    debug!(
        project = %estimate.id,
        mu = params.mu,
        sigma = params.sigma,
        coverage = achieved_coverage,
        iterations = minimum.iterations,
        "calibrated log-normal"
    );

    let warning = (residual > settings.tolerance).then(|| CalibrationWarning {
        project_id: estimate.id.clone(),
        params,
        achieved_coverage,
        target: settings.coverage_target,
    });

    Ok(LogNormalCalibration {
        params,
        achieved_coverage,
        residual,
        iterations: minimum.iterations,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::{calibrate_lognormal, minimize_bounded, CalibrationSettings, LogNormalParams};
    use crate::estimate::ProjectEstimate;
    use crate::EngineError;

    #[test]
    fn brent_finds_parabola_minimum() {
        let min =
            minimize_bounded(|x| (x - 0.3) * (x - 0.3) + 1.0, 0.0, 1.0, 1e-10, 200).unwrap();
        assert_abs_diff_eq!(min.x, 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(min.fx, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn brent_respects_bounds_for_monotone_objective() {
        let min = minimize_bounded(|x| x, 2.0, 5.0, 1e-8, 200).unwrap();
        assert!(min.x >= 2.0 && min.x < 2.0 + 1e-4);
    }

    #[test]
    fn brent_handles_kinked_objective() {
        let min = minimize_bounded(|x: f64| (x - 0.61).abs(), 0.0, 1.0, 1e-10, 500).unwrap();
        assert_abs_diff_eq!(min.x, 0.61, epsilon = 1e-6);
    }

    #[test]
    fn brent_reports_exhausted_iterations() {
        let err = minimize_bounded(|x| (x - 0.3).powi(2), 0.0, 1.0, 1e-12, 2).unwrap_err();
        assert_eq!(err.best.iterations, 2);
    }

    #[test]
    fn calibration_hits_coverage_and_mode() {
        let settings = CalibrationSettings::default();
        let cases = [
            (50.0, 120.0, 250.0),
            (80.0, 150.0, 300.0),
            (40.0, 90.0, 200.0),
            (10.0, 12.0, 20.0),
            (1000.0, 1500.0, 4000.0),
        ];

        for (idx, (low, central, high)) in cases.into_iter().enumerate() {
            let estimate = ProjectEstimate::new(format!("p{idx}"), low, central, high).unwrap();
            let fit = calibrate_lognormal(&estimate, &settings).unwrap();

            assert!(fit.warning.is_none(), "case {idx} flagged imprecise");
            assert!(
                (fit.achieved_coverage - 0.95).abs() <= 0.01,
                "case {idx} coverage {}",
                fit.achieved_coverage
            );
            assert_relative_eq!(fit.params.mode(), central, max_relative = 1e-9);
            assert!(fit.params.sigma > 0.0 && fit.params.sigma <= 1.0);
        }
    }

    #[test]
    fn calibration_is_deterministic() {
        let settings = CalibrationSettings::default();
        let estimate = ProjectEstimate::new("p", 50.0, 120.0, 250.0).unwrap();
        let a = calibrate_lognormal(&estimate, &settings).unwrap();
        let b = calibrate_lognormal(&estimate, &settings).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_target_is_flagged_imprecise() {
        // Every sigma in [0, 1] keeps nearly all mass inside this very wide range.
        let estimate = ProjectEstimate::new("wide", 1.0, 500.0, 100_000.0).unwrap();
        let fit = calibrate_lognormal(&estimate, &CalibrationSettings::default()).unwrap();

        let warning = fit.warning.clone().expect("expected imprecise calibration");
        assert!(warning.achieved_coverage > 0.96);
        assert_eq!(warning.project_id, "wide");
        assert!(matches!(
            warning.into_error(),
            EngineError::CalibrationImprecise { .. }
        ));
    }

    #[test]
    fn tiny_iteration_budget_times_out() {
        let settings = CalibrationSettings {
            max_iterations: 1,
            ..CalibrationSettings::default()
        };
        let estimate = ProjectEstimate::new("slow", 50.0, 120.0, 250.0).unwrap();
        let err = calibrate_lognormal(&estimate, &settings).unwrap_err();
        assert!(err.to_string().contains("low=50, central=120, high=250"));
        assert!(matches!(
            err,
            EngineError::CalibrationTimeout {
                ref id,
                iterations: 1,
                low,
                central,
                high,
            } if id == "slow" && (low, central, high) == (50.0, 120.0, 250.0)
        ));
    }

    #[test]
    fn zero_sigma_is_point_mass_at_central() {
        let params = LogNormalParams::with_mode(120.0, 0.0);
        assert_eq!(params.coverage(50.0, 250.0), 1.0);
        assert_eq!(params.pdf(120.0), 0.0);
        assert_relative_eq!(params.mode(), 120.0, max_relative = 1e-12);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let settings = CalibrationSettings {
            sigma_bounds: (1.0, 0.5),
            ..CalibrationSettings::default()
        };
        let estimate = ProjectEstimate::new("p", 50.0, 120.0, 250.0).unwrap();
        assert!(matches!(
            calibrate_lognormal(&estimate, &settings),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
