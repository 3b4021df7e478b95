//! Lee-Carter calibration: log m(x,t) = a_x + b_x * k_t
//!
//! Two independent estimators fit the same decomposition:
//! - **SVD** ([`SvdCalibrator`]): closed-form rank-1 factorisation of the
//!   centred log-rate matrix, optionally followed by a refinement of k_t
//!   against observed death counts ([`KtObjectiveOptimizer`]).
//! - **Newton-Raphson** ([`NewtonRaphsonCalibrator`]): cyclic coordinate
//!   updates of a_x, k_t and b_x until the parameters stop moving.
//!
//! Both implement [`MortalityCalibrator`], so callers compare them through
//! downstream accuracy scoring without branching on the method.

mod kt_optimizer;
mod newton_raphson;
mod svd;

pub use kt_optimizer::{aggregate_death_objective, KtObjectiveOptimizer, KtRefinement};
pub use newton_raphson::NewtonRaphsonCalibrator;
pub use svd::SvdCalibrator;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::RateMatrix;
use crate::error::{LeeCarterError, Result};

/// Estimation method that produced a set of parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Svd,
    NewtonRaphson,
}

impl CalibrationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            CalibrationMethod::Svd => "SVD",
            CalibrationMethod::NewtonRaphson => "Newton-Raphson",
        }
    }
}

/// Fitted Lee-Carter parameters
///
/// `age_effect` and `age_sensitivity` run parallel to the age axis of the
/// calibration matrix; `time_index` runs parallel to its (historical) periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub ages: Vec<String>,
    pub periods: Vec<String>,
    /// a_x
    pub age_effect: Array1<f64>,
    /// b_x
    pub age_sensitivity: Array1<f64>,
    /// k_t
    pub time_index: Array1<f64>,
}

impl ModelParameters {
    pub fn new(
        ages: Vec<String>,
        periods: Vec<String>,
        age_effect: Array1<f64>,
        age_sensitivity: Array1<f64>,
        time_index: Array1<f64>,
    ) -> Result<Self> {
        if age_effect.len() != ages.len() || age_sensitivity.len() != ages.len() {
            return Err(LeeCarterError::shape(
                "ModelParameters age vectors",
                ages.len(),
                format!("a_x {} / b_x {}", age_effect.len(), age_sensitivity.len()),
            ));
        }
        if time_index.len() != periods.len() {
            return Err(LeeCarterError::shape(
                "ModelParameters time index",
                periods.len(),
                time_index.len(),
            ));
        }
        Ok(Self { ages, periods, age_effect, age_sensitivity, time_index })
    }

    pub fn num_ages(&self) -> usize {
        self.ages.len()
    }

    pub fn num_periods(&self) -> usize {
        self.periods.len()
    }

    /// Fitted log rates a_x + b_x * k_t over the calibration periods
    pub fn fitted_log_rates(&self) -> Array2<f64> {
        log_rates(&self.age_effect, &self.age_sensitivity, &self.time_index)
    }
}

/// a_x + b_x * k_t as an (ages × periods) matrix
pub(crate) fn log_rates(
    age_effect: &Array1<f64>,
    age_sensitivity: &Array1<f64>,
    time_index: &Array1<f64>,
) -> Array2<f64> {
    Array2::from_shape_fn((age_effect.len(), time_index.len()), |(x, t)| {
        age_effect[x] + age_sensitivity[x] * time_index[t]
    })
}

/// How an estimation run terminated
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub method: CalibrationMethod,
    /// False when an iterative method stopped at its iteration cap
    pub converged: bool,
    /// Update passes (Newton-Raphson) or optimiser iterations (SVD refinement)
    pub iterations: usize,
}

/// Parameters plus termination status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub parameters: ModelParameters,
    pub status: CalibrationStatus,
}

/// An estimator of Lee-Carter parameters from historical death rates
///
/// Implementations take logs themselves and must raise a domain error for
/// any rate outside (0, 1) before doing so.
pub trait MortalityCalibrator {
    fn method(&self) -> CalibrationMethod;

    /// Fit a_x, b_x and k_t to a fully populated matrix of death rates
    fn calibrate(&self, death_rates: &RateMatrix) -> Result<Calibration>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_parameter_shapes_checked() {
        let result = ModelParameters::new(
            vec!["0".into(), "1".into()],
            vec!["a".into()],
            array![0.0, 0.0],
            array![0.5],
            array![0.0],
        );
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }

    #[test]
    fn test_fitted_log_rates() {
        let params = ModelParameters::new(
            vec!["0".into()],
            vec!["a".into(), "b".into(), "c".into()],
            array![-2.0],
            array![0.5],
            array![0.0, 1.0, 2.0],
        )
        .unwrap();
        assert_eq!(params.fitted_log_rates(), array![[-2.0, -1.5, -1.0]]);
    }
}
