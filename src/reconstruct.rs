//! Fitted or forecast Lee-Carter parameters back to rate space
//!
//! death rate m(x,t) = exp(a_x + b_x * k_t)
//! mortality rate q(x,t) = 1 - exp(-m(x,t))

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::calibration::{log_rates, ModelParameters};
use crate::data::RateMatrix;
use crate::error::{LeeCarterError, Result};

/// Death and mortality rates over one set of periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    pub death_rates: RateMatrix,
    pub mortality_rates: RateMatrix,
}

/// Pure mapping from (a_x, b_x, k_t) to rates
#[derive(Debug, Clone, Copy, Default)]
pub struct RateReconstructor;

impl RateReconstructor {
    pub fn new() -> Self {
        Self
    }

    /// Rates for arbitrary parameter vectors and labels
    pub fn reconstruct(
        &self,
        ages: &[String],
        age_effect: &Array1<f64>,
        age_sensitivity: &Array1<f64>,
        periods: &[String],
        time_index: &Array1<f64>,
    ) -> Result<Reconstruction> {
        if age_effect.len() != ages.len() || age_sensitivity.len() != ages.len() {
            return Err(LeeCarterError::shape(
                "reconstruction age vectors",
                ages.len(),
                format!("a_x {} / b_x {}", age_effect.len(), age_sensitivity.len()),
            ));
        }
        if time_index.len() != periods.len() {
            return Err(LeeCarterError::shape(
                "reconstruction time index",
                periods.len(),
                time_index.len(),
            ));
        }

        let death = log_rates(age_effect, age_sensitivity, time_index).mapv(f64::exp);
        if let Some(((i, j), v)) = death.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(LeeCarterError::Domain(format!(
                "reconstructed death rate {v} at age {} / period {} is not finite",
                ages[i], periods[j]
            )));
        }
        let mortality = death.mapv(|m| -(-m).exp_m1());

        Ok(Reconstruction {
            death_rates: RateMatrix::new(ages.to_vec(), periods.to_vec(), death)?,
            mortality_rates: RateMatrix::new(ages.to_vec(), periods.to_vec(), mortality)?,
        })
    }

    /// In-sample rates over the calibration periods
    pub fn fitted(&self, parameters: &ModelParameters) -> Result<Reconstruction> {
        self.reconstruct(
            &parameters.ages,
            &parameters.age_effect,
            &parameters.age_sensitivity,
            &parameters.periods,
            &parameters.time_index,
        )
    }

    /// Rates for a forecast time index over future `periods`
    pub fn forecast(
        &self,
        parameters: &ModelParameters,
        time_index: &Array1<f64>,
        periods: &[String],
    ) -> Result<Reconstruction> {
        self.reconstruct(
            &parameters.ages,
            &parameters.age_effect,
            &parameters.age_sensitivity,
            periods,
            time_index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn single_age() -> ModelParameters {
        ModelParameters::new(
            vec!["0".into()],
            vec!["a".into(), "b".into(), "c".into()],
            array![-2.0],
            array![0.5],
            array![0.0, 1.0, 2.0],
        )
        .unwrap()
    }

    #[test]
    fn test_single_age_rates() {
        let rec = RateReconstructor::new().fitted(&single_age()).unwrap();

        let m = rec.death_rates.values();
        assert_abs_diff_eq!(m[[0, 0]], (-2.0_f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(m[[0, 0]], 0.1353, epsilon = 1e-4);
        assert_abs_diff_eq!(m[[0, 1]], 0.2231, epsilon = 1e-4);
        assert_abs_diff_eq!(m[[0, 2]], 0.3679, epsilon = 1e-4);

        let q = rec.mortality_rates.values();
        assert_abs_diff_eq!(q[[0, 0]], 0.1264, epsilon = 1e-4);
        assert_abs_diff_eq!(q[[0, 1]], 0.1997, epsilon = 1e-4);
        assert_abs_diff_eq!(q[[0, 2]], 0.3079, epsilon = 1e-4);
    }

    #[test]
    fn test_bit_identical_on_repeat() {
        let params = single_age();
        let first = RateReconstructor::new().fitted(&params).unwrap();
        let second = RateReconstructor::new().fitted(&params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_forecast_periods() {
        let params = single_age();
        let future = vec!["d".to_string(), "e".to_string()];
        let rec = RateReconstructor::new()
            .forecast(&params, &array![3.0, 4.0], &future)
            .unwrap();
        assert_eq!(rec.death_rates.periods(), future.as_slice());
        assert_abs_diff_eq!(rec.death_rates.values()[[0, 1]], 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_shape_mismatch() {
        let params = single_age();
        let result = RateReconstructor::new().forecast(&params, &array![3.0], &["d".into(), "e".into()]);
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }

    #[test]
    fn test_overflow_is_domain_error() {
        let params = single_age();
        let result = RateReconstructor::new().forecast(&params, &array![2000.0], &["d".into()]);
        assert!(matches!(result, Err(LeeCarterError::Domain(_))));
    }
}
