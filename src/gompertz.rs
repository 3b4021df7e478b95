//! Gompertz-Makeham law m(x) = A + B * exp(C * x), fitted period by period
//!
//! Used only as a parametric benchmark for the Lee-Carter fit. Each period's
//! death rates are fitted over the age-group midpoints by Levenberg-Marquardt
//! with A, B, C projected onto the non-negative orthant after every step.

use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::config::GompertzMakehamConfig;
use crate::data::RateMatrix;
use crate::error::{LeeCarterError, Result};
use crate::reconstruct::Reconstruction;

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Fitted law for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GompertzMakehamFit {
    pub period: String,
    /// Age-independent (Makeham) term
    pub a: f64,
    /// Gompertz level
    pub b: f64,
    /// Gompertz rate of ageing
    pub c: f64,
    pub sse: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl GompertzMakehamFit {
    pub fn death_rate(&self, age: f64) -> f64 {
        law(self.a, self.b, self.c, age)
    }
}

/// Per-period fits and the rates they imply over the whole table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GompertzMakehamComparison {
    pub fits: Vec<GompertzMakehamFit>,
    pub reconstruction: Reconstruction,
}

#[derive(Debug, Clone, Default)]
pub struct GompertzMakehamFitter {
    config: GompertzMakehamConfig,
}

impl GompertzMakehamFitter {
    pub fn new(config: GompertzMakehamConfig) -> Self {
        Self { config }
    }

    /// Fit every period of `death_rates`; `midpoints` gives the age of each row
    pub fn fit(&self, death_rates: &RateMatrix, midpoints: &[f64]) -> Result<GompertzMakehamComparison> {
        if midpoints.len() != death_rates.num_ages() {
            return Err(LeeCarterError::shape(
                "Gompertz-Makeham age midpoints",
                death_rates.num_ages(),
                midpoints.len(),
            ));
        }

        let values = death_rates.values();
        let fits = death_rates
            .periods()
            .iter()
            .enumerate()
            .map(|(t, period)| self.fit_period(period, midpoints, values.column(t)))
            .collect::<Result<Vec<_>>>()?;

        let death = Array2::from_shape_fn(values.dim(), |(x, t)| fits[t].death_rate(midpoints[x]));
        if death.iter().any(|v| !v.is_finite()) {
            return Err(LeeCarterError::Domain(
                "Gompertz-Makeham rates overflow at the oldest ages".into(),
            ));
        }
        let mortality = death.mapv(|m| -(-m).exp_m1());

        Ok(GompertzMakehamComparison {
            fits,
            reconstruction: Reconstruction {
                death_rates: death_rates.with_values(death)?,
                mortality_rates: death_rates.with_values(mortality)?,
            },
        })
    }

    /// Fit one age curve
    pub fn fit_period(&self, period: &str, ages: &[f64], rates: ArrayView1<'_, f64>) -> Result<GompertzMakehamFit> {
        if ages.len() < 3 {
            return Err(LeeCarterError::shape(
                "Gompertz-Makeham fit",
                "at least 3 age groups",
                ages.len(),
            ));
        }
        let y: Vec<f64> = rates.to_vec();
        let mut params = initial_guess(ages, &y).ok_or_else(|| {
            LeeCarterError::Degenerate(format!("no positive death rates in period {period}"))
        })?;

        let sse_at = |p: &Vector3<f64>| -> f64 {
            ages.iter()
                .zip(&y)
                .map(|(&x, &yi)| (yi - law(p[0], p[1], p[2], x)).powi(2))
                .sum()
        };

        let mut sse = sse_at(&params);
        let mut damping = INITIAL_DAMPING;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            let (jtj, jtr) = normal_equations(ages, &y, &params);

            let mut accepted = None;
            while damping < MAX_DAMPING {
                let mut damped = jtj;
                for i in 0..3 {
                    damped[(i, i)] += damping * jtj[(i, i)];
                }
                if let Some(step) = damped.lu().solve(&jtr) {
                    let candidate = (params + step).map(|v| v.max(0.0));
                    let candidate_sse = sse_at(&candidate);
                    if candidate_sse.is_finite() && candidate_sse < sse {
                        accepted = Some((candidate, candidate_sse));
                        break;
                    }
                }
                damping *= 10.0;
            }

            // No descent direction left: stationary within the bounds
            let Some((candidate, candidate_sse)) = accepted else {
                converged = true;
                break;
            };

            let relative_drop = (sse - candidate_sse) / sse.max(f64::MIN_POSITIVE);
            params = candidate;
            sse = candidate_sse;
            damping = (damping / 10.0).max(MIN_DAMPING);

            if relative_drop < self.config.tolerance || sse == 0.0 {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(
                "Gompertz-Makeham {period}: A={:.3e} B={:.3e} C={:.4} after {iterations} iterations",
                params[0], params[1], params[2]
            );
        } else {
            warn!("Gompertz-Makeham fit for {period} stopped at {iterations} iterations");
        }

        Ok(GompertzMakehamFit {
            period: period.to_string(),
            a: params[0],
            b: params[1],
            c: params[2],
            sse,
            iterations,
            converged,
        })
    }
}

fn law(a: f64, b: f64, c: f64, age: f64) -> f64 {
    a + b * (c * age).exp()
}

/// Log-linear fit of ln m on age for B and C; half the smallest rate for A
fn initial_guess(ages: &[f64], y: &[f64]) -> Option<Vector3<f64>> {
    let points: Vec<(f64, f64)> = ages
        .iter()
        .zip(y)
        .filter(|(_, yi)| **yi > 0.0)
        .map(|(&x, &yi)| (x, yi.ln()))
        .collect();
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let x_mean = points.iter().map(|p| p.0).sum::<f64>() / n;
    let l_mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - x_mean).powi(2)).sum();
    let sxl: f64 = points.iter().map(|p| (p.0 - x_mean) * (p.1 - l_mean)).sum();

    let c = if sxx > 0.0 { (sxl / sxx).max(0.0) } else { 0.0 };
    let b = (l_mean - c * x_mean).exp();
    let a = 0.5 * y.iter().copied().fold(f64::INFINITY, f64::min).max(0.0);
    Some(Vector3::new(a, b, c))
}

/// J^T J and J^T r for the residuals y - law(x)
fn normal_equations(ages: &[f64], y: &[f64], p: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    for (&x, &yi) in ages.iter().zip(y) {
        let growth = (p[2] * x).exp();
        let grad = Vector3::new(1.0, growth, p[1] * x * growth);
        let residual = yi - (p[0] + p[1] * growth);
        jtj += grad * grad.transpose();
        jtr += grad * residual;
    }
    (jtj, jtr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, NZ_AGE_GROUPS};
    use approx::assert_relative_eq;

    fn nz_midpoints() -> Vec<f64> {
        ModelConfig::new_zealand().age_midpoints().unwrap()
    }

    #[test]
    fn test_recovers_exact_law() {
        let ages = nz_midpoints();
        let rates: ndarray::Array1<f64> = ages.iter().map(|&x| law(5e-4, 3e-5, 0.1, x)).collect();

        let fit = GompertzMakehamFitter::default()
            .fit_period("1950-1954", &ages, rates.view())
            .unwrap();

        assert!(fit.converged);
        assert_relative_eq!(fit.a, 5e-4, max_relative = 1e-6);
        assert_relative_eq!(fit.b, 3e-5, max_relative = 1e-6);
        assert_relative_eq!(fit.c, 0.1, max_relative = 1e-6);
        assert!(fit.sse < 1e-20);
    }

    #[test]
    fn test_parameters_stay_non_negative() {
        let ages = nz_midpoints();
        // decreasing with age: best unconstrained C would be negative
        let rates: ndarray::Array1<f64> = ages.iter().map(|&x| 0.05 * (-0.02 * x).exp()).collect();

        let fit = GompertzMakehamFitter::default()
            .fit_period("p", &ages, rates.view())
            .unwrap();
        assert!(fit.a >= 0.0 && fit.b >= 0.0 && fit.c >= 0.0);
        assert!(fit.sse.is_finite());
    }

    #[test]
    fn test_table_fit_and_reconstruction() {
        let ages = nz_midpoints();
        let periods = ["1950-1954", "1955-1959"];
        let values = Array2::from_shape_fn((ages.len(), 2), |(x, t)| {
            law(8e-4 - 1e-4 * t as f64, 2e-5, 0.095, ages[x])
        });
        let rates = RateMatrix::from_labels(&NZ_AGE_GROUPS, &periods, values).unwrap();

        let comparison = GompertzMakehamFitter::default().fit(&rates, &ages).unwrap();
        assert_eq!(comparison.fits.len(), 2);
        assert_eq!(comparison.fits[1].period, "1955-1959");
        assert_relative_eq!(comparison.fits[1].a, 7e-4, max_relative = 1e-5);

        let q = comparison.reconstruction.mortality_rates.values();
        let m = comparison.reconstruction.death_rates.values();
        assert_relative_eq!(q[[20, 0]], 1.0 - (-m[[20, 0]]).exp(), max_relative = 1e-12);
    }

    #[test]
    fn test_midpoint_count_checked() {
        let rates = RateMatrix::from_labels(&["0", "1"], &["a"], ndarray::array![[0.01], [0.02]]).unwrap();
        let result = GompertzMakehamFitter::default().fit(&rates, &[0.0]);
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }
}
