//! Extrapolation of the calibrated time index k_t
//!
//! Two interchangeable strategies:
//! - [`ForecastMethod::LinearTrend`]: OLS line on the period index, with
//!   fit statistics and residual diagnostics
//! - [`ForecastMethod::RandomWalk`]: ARIMA(0,1,0), forecasting the last value
//!
//! Diagnostics are informational; a forecast is produced regardless of them.

pub mod diagnostics;
mod linear;
mod random_walk;

pub use diagnostics::{kolmogorov_cdf, RegressionDiagnostics};
pub use linear::{fit_linear_trend, LinearTrendFit};
pub use random_walk::{fit_random_walk, RandomWalkFit};

use log::{info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Diagnostic p-values below this are logged as warnings
const DIAGNOSTIC_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    LinearTrend,
    RandomWalk,
}

impl ForecastMethod {
    pub const ALL: [ForecastMethod; 2] = [ForecastMethod::LinearTrend, ForecastMethod::RandomWalk];

    pub fn label(&self) -> &'static str {
        match self {
            ForecastMethod::LinearTrend => "linear trend",
            ForecastMethod::RandomWalk => "ARIMA(0,1,0)",
        }
    }
}

/// Forecast time index plus the fitted model that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub method: ForecastMethod,
    pub horizon: usize,
    /// k_t for the next `horizon` periods
    pub values: Array1<f64>,
    pub linear: Option<LinearTrendFit>,
    pub random_walk: Option<RandomWalkFit>,
}

/// Stateless forecaster over a historical time index
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeIndexForecaster;

impl TimeIndexForecaster {
    pub fn new() -> Self {
        Self
    }

    /// Forecast `horizon` periods past the end of `time_index`
    pub fn forecast(
        &self,
        method: ForecastMethod,
        time_index: &Array1<f64>,
        horizon: usize,
    ) -> Result<ForecastResult> {
        let result = match method {
            ForecastMethod::LinearTrend => {
                let fit = fit_linear_trend(time_index)?;
                log_diagnostics(&fit);
                ForecastResult {
                    method,
                    horizon,
                    values: fit.extrapolate(time_index.len(), horizon),
                    linear: Some(fit),
                    random_walk: None,
                }
            }
            ForecastMethod::RandomWalk => {
                let fit = fit_random_walk(time_index, horizon)?;
                ForecastResult {
                    method,
                    horizon,
                    values: fit.point_forecast(),
                    linear: None,
                    random_walk: Some(fit),
                }
            }
        };

        info!(
            "{} forecast of k_t over {} periods: {:?}",
            method.label(),
            horizon,
            result.values.to_vec()
        );
        Ok(result)
    }

    /// Both strategies, in [`ForecastMethod::ALL`] order
    pub fn forecast_all(&self, time_index: &Array1<f64>, horizon: usize) -> Result<Vec<ForecastResult>> {
        ForecastMethod::ALL
            .iter()
            .map(|&method| self.forecast(method, time_index, horizon))
            .collect()
    }
}

fn log_diagnostics(fit: &LinearTrendFit) {
    let Some(diag) = &fit.diagnostics else {
        return;
    };
    if diag.ks_p_value < DIAGNOSTIC_ALPHA {
        warn!("k_t trend residuals look non-normal (KS p = {:.4})", diag.ks_p_value);
    }
    if diag.breusch_pagan_p_value < DIAGNOSTIC_ALPHA {
        warn!(
            "k_t trend residuals look heteroscedastic (Breusch-Pagan p = {:.4})",
            diag.breusch_pagan_p_value
        );
    }
    if diag.f_p_value >= DIAGNOSTIC_ALPHA {
        warn!("k_t trend is not significant (F p = {:.4})", diag.f_p_value);
    }
}
