//! Ordinary least-squares trend of k_t on the period index 0, 1, 2, ...

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::diagnostics::{regression_diagnostics, RegressionDiagnostics};
use crate::error::{LeeCarterError, Result};

/// Fitted straight line k_t = intercept + slope * t
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrendFit {
    pub intercept: f64,
    pub slope: f64,
    /// Coefficient of determination; 1 when the series is constant
    pub r_squared: f64,
    /// Pearson correlation between index and series; 0 when either is constant
    pub correlation: f64,
    pub residuals: Array1<f64>,
    /// Absent for fewer than three points or an exact fit
    pub diagnostics: Option<RegressionDiagnostics>,
}

impl LinearTrendFit {
    pub fn predict(&self, index: f64) -> f64 {
        self.intercept + self.slope * index
    }

    /// Values at the `horizon` indices following the `history_len` fitted ones
    pub fn extrapolate(&self, history_len: usize, horizon: usize) -> Array1<f64> {
        (history_len..history_len + horizon)
            .map(|i| self.predict(i as f64))
            .collect()
    }
}

/// Fit the trend line to `series`, indexed from zero
pub fn fit_linear_trend(series: &Array1<f64>) -> Result<LinearTrendFit> {
    let n = series.len();
    if n < 2 {
        return Err(LeeCarterError::shape(
            "linear trend",
            "at least 2 periods",
            n,
        ));
    }

    let index: Array1<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = index.sum() / n as f64;
    let y_mean = series.sum() / n as f64;

    let sxx: f64 = index.iter().map(|x| (x - x_mean).powi(2)).sum();
    let syy: f64 = series.iter().map(|y| (y - y_mean).powi(2)).sum();
    let sxy: f64 = index
        .iter()
        .zip(series.iter())
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let residuals: Array1<f64> = index
        .iter()
        .zip(series.iter())
        .map(|(x, y)| y - (intercept + slope * x))
        .collect();
    let sse: f64 = residuals.iter().map(|e| e * e).sum();

    let r_squared = if syy > 0.0 { 1.0 - sse / syy } else { 1.0 };
    let correlation = if syy > 0.0 { sxy / (sxx * syy).sqrt() } else { 0.0 };

    let model_sum_squares = slope * sxy;
    let diagnostics = regression_diagnostics(&index, &residuals, model_sum_squares)?;

    Ok(LinearTrendFit {
        intercept,
        slope,
        r_squared,
        correlation,
        residuals,
        diagnostics,
    })
}
