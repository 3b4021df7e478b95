//! Closed-form Lee-Carter fit by singular value decomposition

use log::{debug, info};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};

use super::kt_optimizer::KtObjectiveOptimizer;
use super::{Calibration, CalibrationMethod, CalibrationStatus, ModelParameters, MortalityCalibrator};
use crate::data::{MortalityData, RateMatrix};
use crate::error::{LeeCarterError, Result};

/// Sum of the leading left singular vector below which b_x cannot be normalised
const MIN_SENSITIVITY_SUM: f64 = 1e-12;

/// SVD estimator with optional k_t refinement against observed deaths
///
/// Output satisfies sum(b_x) = 1 and mean(k_t) = 0. When refinement data is
/// attached, k_t is then re-fitted so that expected deaths match observed
/// deaths period by period; a_x and b_x are kept.
#[derive(Debug, Clone, Default)]
pub struct SvdCalibrator {
    refinement: Option<(MortalityData, KtObjectiveOptimizer)>,
}

impl SvdCalibrator {
    /// Plain SVD decomposition, no refinement
    pub fn new() -> Self {
        Self { refinement: None }
    }

    /// Refine k_t against historical deaths and exposure on the same layout
    /// as the rates passed to [`MortalityCalibrator::calibrate`]
    pub fn with_refinement(mut self, historical: MortalityData, optimizer: KtObjectiveOptimizer) -> Self {
        self.refinement = Some((historical, optimizer));
        self
    }

    /// Rank-1 decomposition of the centred log-rate matrix
    ///
    /// k_t is σ·v scaled by Σu (then centred), so it differs in scale from
    /// the unscaled σ·v convention; b ⊗ k is the same either way.
    pub fn decompose(&self, death_rates: &RateMatrix) -> Result<ModelParameters> {
        let log_rates = death_rates.log_rates()?;
        let (n, m) = log_rates.dim();
        if n == 0 || m == 0 {
            return Err(LeeCarterError::shape("SVD input", "non-empty matrix", format!("{n} x {m}")));
        }

        let age_effect = log_rates
            .mean_axis(Axis(1))
            .ok_or_else(|| LeeCarterError::Degenerate("empty log-rate rows".into()))?;
        let residual = &log_rates - &age_effect.view().insert_axis(Axis(1));

        let (u1, sigma, v1) = leading_singular_triplet(&residual)?;
        debug!("Leading singular value {sigma:.6}");

        let u_sum = u1.sum();
        if u_sum.abs() < MIN_SENSITIVITY_SUM {
            return Err(LeeCarterError::Degenerate(
                "leading singular vector sums to zero; b_x cannot be normalised".into(),
            ));
        }

        // b = u / sum(u) and k = sigma * v * sum(u) keep the product b k unchanged
        let age_sensitivity = &u1 / u_sum;
        let raw_time_index = v1 * (sigma * u_sum);
        let time_index = &raw_time_index - raw_time_index.mean().unwrap_or(0.0);

        ModelParameters::new(
            death_rates.ages().to_vec(),
            death_rates.periods().to_vec(),
            age_effect,
            age_sensitivity,
            time_index,
        )
    }
}

impl MortalityCalibrator for SvdCalibrator {
    fn method(&self) -> CalibrationMethod {
        CalibrationMethod::Svd
    }

    fn calibrate(&self, death_rates: &RateMatrix) -> Result<Calibration> {
        let mut parameters = self.decompose(death_rates)?;
        let mut iterations = 0;

        if let Some((historical, optimizer)) = &self.refinement {
            if !historical.deaths().same_layout(death_rates) {
                return Err(LeeCarterError::shape(
                    "k_t refinement data",
                    format!("{} x {}", death_rates.num_ages(), death_rates.num_periods()),
                    format!("{} x {}", historical.deaths().num_ages(), historical.deaths().num_periods()),
                ));
            }
            let refined = optimizer.refine(&parameters, historical)?;
            iterations = refined.iterations;
            parameters.time_index = refined.time_index;
        }

        info!(
            "SVD calibration complete: {} ages x {} periods{}",
            parameters.num_ages(),
            parameters.num_periods(),
            if self.refinement.is_some() { " (k_t refined)" } else { "" }
        );

        Ok(Calibration {
            parameters,
            status: CalibrationStatus {
                method: CalibrationMethod::Svd,
                converged: true,
                iterations,
            },
        })
    }
}

/// First left singular vector, largest singular value, first right singular vector
fn leading_singular_triplet(matrix: &Array2<f64>) -> Result<(Array1<f64>, f64, Array1<f64>)> {
    let (n, m) = matrix.dim();
    let dense = DMatrix::from_fn(n, m, |i, j| matrix[[i, j]]);
    let svd = dense.svd(true, true);

    let u = svd
        .u
        .ok_or_else(|| LeeCarterError::Degenerate("SVD did not produce U".into()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| LeeCarterError::Degenerate("SVD did not produce V^T".into()))?;

    let (lead, sigma) = svd
        .singular_values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, s)| if s > best.1 { (i, s) } else { best });

    let u1 = (0..n).map(|i| u[(i, lead)]).collect::<Array1<f64>>();
    let v1 = (0..m).map(|j| v_t[(lead, j)]).collect::<Array1<f64>>();
    Ok((u1, sigma, v1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::test_support::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Synthetic log rates with a non-rank-1 perturbation
    fn noisy_rates() -> RateMatrix {
        let clean = synthetic_rates();
        let logs = clean.log_rates().unwrap();
        let noisy = Array2::from_shape_fn(logs.dim(), |(i, j)| {
            logs[[i, j]] + 0.05 * ((i * 7 + j * 3) as f64).sin()
        });
        clean.with_values(noisy.mapv(f64::exp)).unwrap()
    }

    fn residual_norm(centred: &Array2<f64>, b: &Array1<f64>, k: &Array1<f64>) -> f64 {
        let fit = Array2::from_shape_fn(centred.dim(), |(x, t)| b[x] * k[t]);
        (centred - &fit).mapv(|v| v * v).sum().sqrt()
    }

    #[test]
    fn test_normalisation_invariants() {
        for rates in [synthetic_rates(), noisy_rates()] {
            let params = SvdCalibrator::new().decompose(&rates).unwrap();
            assert_abs_diff_eq!(params.age_sensitivity.sum(), 1.0, epsilon = 1e-10);
            assert_abs_diff_eq!(params.time_index.mean().unwrap(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_recovers_exact_lee_carter_surface() {
        let params = SvdCalibrator::new().decompose(&synthetic_rates()).unwrap();

        for (fitted, expected) in params.age_effect.iter().zip(true_age_effect().iter()) {
            assert_abs_diff_eq!(*fitted, *expected, epsilon = 1e-10);
        }
        for (fitted, expected) in params.age_sensitivity.iter().zip(true_sensitivity().iter()) {
            assert_abs_diff_eq!(*fitted, *expected, epsilon = 1e-10);
        }
        for (fitted, expected) in params.time_index.iter().zip(true_time_index().iter()) {
            assert_abs_diff_eq!(*fitted, *expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_best_rank_one_approximation() {
        let rates = noisy_rates();
        let params = SvdCalibrator::new().decompose(&rates).unwrap();

        let logs = rates.log_rates().unwrap();
        let centred = &logs - &params.age_effect.view().insert_axis(Axis(1));
        let best = residual_norm(&centred, &params.age_sensitivity, &params.time_index);

        for step in [1e-3, -1e-3, 1e-2, -5e-2] {
            let b = params.age_sensitivity.mapv(|v| v + step);
            let k = params.time_index.mapv(|v| v * (1.0 + step));
            assert!(best <= residual_norm(&centred, &b, &k) + 1e-12);

            let mut b_tilt = params.age_sensitivity.clone();
            b_tilt[0] += step;
            b_tilt[3] -= step;
            assert!(best <= residual_norm(&centred, &b_tilt, &params.time_index) + 1e-12);
        }
    }

    #[test]
    fn test_age_effect_is_row_mean_of_logs() {
        let rates = noisy_rates();
        let params = SvdCalibrator::new().decompose(&rates).unwrap();
        let logs = rates.log_rates().unwrap();
        for x in 0..rates.num_ages() {
            assert_abs_diff_eq!(params.age_effect[x], logs.row(x).mean().unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rate_of_one_is_domain_error() {
        let rates =
            RateMatrix::from_labels(&["0", "1"], &["a", "b"], array![[0.1, 1.0], [0.2, 0.3]]).unwrap();
        let result = SvdCalibrator::new().calibrate(&rates);
        assert!(matches!(result, Err(LeeCarterError::Domain(_))));
    }

    #[test]
    fn test_calibrate_reports_closed_form_status() {
        let calibration = SvdCalibrator::new().calibrate(&synthetic_rates()).unwrap();
        assert_eq!(calibration.status.method, CalibrationMethod::Svd);
        assert!(calibration.status.converged);
        assert_eq!(calibration.status.iterations, 0);
    }
}
