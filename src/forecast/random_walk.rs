//! ARIMA(0,1,0): driftless random walk on k_t
//!
//! The order is fixed; nothing is estimated except the innovation variance,
//! which only feeds the prediction intervals.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{LeeCarterError, Result};

/// Point forecasts with 95% normal prediction intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomWalkFit {
    pub last_value: f64,
    /// Mean squared first difference
    pub sigma2: f64,
    pub std_errors: Array1<f64>,
    pub lower_95: Array1<f64>,
    pub upper_95: Array1<f64>,
}

impl RandomWalkFit {
    /// Every step forecasts the last observed value
    pub fn point_forecast(&self) -> Array1<f64> {
        Array1::from_elem(self.std_errors.len(), self.last_value)
    }
}

pub fn fit_random_walk(series: &Array1<f64>, horizon: usize) -> Result<RandomWalkFit> {
    let n = series.len();
    if n < 2 {
        return Err(LeeCarterError::shape("random walk", "at least 2 periods", n));
    }
    let last_value = series[n - 1];

    let sigma2 = series
        .windows(2)
        .into_iter()
        .map(|w| (w[1] - w[0]).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;

    let z = Normal::new(0.0, 1.0)
        .map_err(|e| LeeCarterError::Statistics(e.to_string()))?
        .inverse_cdf(0.975);

    let std_errors: Array1<f64> = (1..=horizon).map(|h| (h as f64 * sigma2).sqrt()).collect();
    let lower_95 = std_errors.mapv(|se| last_value - z * se);
    let upper_95 = std_errors.mapv(|se| last_value + z * se);

    Ok(RandomWalkFit {
        last_value,
        sigma2,
        std_errors,
        lower_95,
        upper_95,
    })
}
