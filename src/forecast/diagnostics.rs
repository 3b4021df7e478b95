//! Residual diagnostics for the linear trend on k_t
//!
//! These are reported alongside the forecast and never gate it.

use nalgebra::DMatrix;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

use crate::error::{LeeCarterError, Result};

/// Residual sum of squares treated as an exact fit
const EXACT_FIT_SSE: f64 = 1e-24;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionDiagnostics {
    /// Serial correlation of residuals; ~2 when uncorrelated
    pub durbin_watson: f64,
    /// Overall F statistic of the trend regression and its p-value under F(1, n - 2)
    pub f_statistic: f64,
    pub f_p_value: f64,
    /// Kolmogorov-Smirnov distance of residuals from N(mean, std) and exact two-sided p-value
    pub ks_statistic: f64,
    pub ks_p_value: f64,
    /// Breusch-Pagan LM statistic (n * R^2 of squared residuals on the trend) and chi-squared(1) p-value
    pub breusch_pagan_lm: f64,
    pub breusch_pagan_p_value: f64,
}

/// Compute all diagnostics for a simple regression on `regressor`
///
/// Returns `Ok(None)` when there are fewer than three observations or the
/// residuals are identically zero, since every statistic is undefined there.
pub fn regression_diagnostics(
    regressor: &Array1<f64>,
    residuals: &Array1<f64>,
    model_sum_squares: f64,
) -> Result<Option<RegressionDiagnostics>> {
    let n = residuals.len();
    let sse: f64 = residuals.iter().map(|e| e * e).sum();
    if n < 3 || sse < EXACT_FIT_SSE {
        return Ok(None);
    }

    let (f_statistic, f_p_value) = f_test(model_sum_squares, sse, n)?;
    let (ks_statistic, ks_p_value) = kolmogorov_smirnov_normal(residuals)?;
    let (breusch_pagan_lm, breusch_pagan_p_value) = breusch_pagan(regressor, residuals)?;

    Ok(Some(RegressionDiagnostics {
        durbin_watson: durbin_watson(residuals),
        f_statistic,
        f_p_value,
        ks_statistic,
        ks_p_value,
        breusch_pagan_lm,
        breusch_pagan_p_value,
    }))
}

/// sum (e_t - e_{t-1})^2 / sum e_t^2
pub fn durbin_watson(residuals: &Array1<f64>) -> f64 {
    let numerator: f64 = residuals
        .windows(2)
        .into_iter()
        .map(|w| (w[1] - w[0]).powi(2))
        .sum();
    let denominator: f64 = residuals.iter().map(|e| e * e).sum();
    numerator / denominator
}

/// F statistic for one regressor plus intercept
pub fn f_test(model_sum_squares: f64, sse: f64, n: usize) -> Result<(f64, f64)> {
    let df_resid = (n - 2) as f64;
    let f = model_sum_squares / (sse / df_resid);
    let dist = FisherSnedecor::new(1.0, df_resid)
        .map_err(|e| LeeCarterError::Statistics(e.to_string()))?;
    let p = if f.is_finite() { dist.sf(f) } else { 0.0 };
    Ok((f, p))
}

/// KS test of a sample against a normal with the sample's mean and population std
pub fn kolmogorov_smirnov_normal(sample: &Array1<f64>) -> Result<(f64, f64)> {
    let n = sample.len();
    let nf = n as f64;
    let mean = sample.sum() / nf;
    let std = (sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nf).sqrt();
    let normal = Normal::new(mean, std).map_err(|e| LeeCarterError::Statistics(e.to_string()))?;

    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let statistic = sorted.iter().enumerate().fold(0.0_f64, |acc, (i, &x)| {
        let cdf = normal.cdf(x);
        let above = (i as f64 + 1.0) / nf - cdf;
        let below = cdf - i as f64 / nf;
        acc.max(above).max(below)
    });

    let p_value = (1.0 - kolmogorov_cdf(n, statistic)).clamp(0.0, 1.0);
    Ok((statistic, p_value))
}

/// Koenker's Breusch-Pagan test: n * R^2 of e^2 regressed on the regressor
pub fn breusch_pagan(regressor: &Array1<f64>, residuals: &Array1<f64>) -> Result<(f64, f64)> {
    let n = residuals.len();
    let squared = residuals.mapv(|e| e * e);
    let r_squared = simple_r_squared(regressor, &squared);
    let lm = n as f64 * r_squared;

    let dist = ChiSquared::new(1.0).map_err(|e| LeeCarterError::Statistics(e.to_string()))?;
    Ok((lm, dist.sf(lm)))
}

fn simple_r_squared(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    let x_mean = x.sum() / n;
    let y_mean = y.sum() / n;
    let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| (a - x_mean) * (b - y_mean)).sum();
    let sxx: f64 = x.iter().map(|a| (a - x_mean).powi(2)).sum();
    let syy: f64 = y.iter().map(|b| (b - y_mean).powi(2)).sum();
    if sxx <= 0.0 || syy <= 0.0 {
        0.0
    } else {
        sxy * sxy / (sxx * syy)
    }
}

/// P(D_n < d) for the two-sided one-sample Kolmogorov statistic
///
/// Marsaglia, Tsang & Wang (2003) matrix method, with the same 1e140
/// rescaling to keep the matrix power in range.
pub fn kolmogorov_cdf(n: usize, d: f64) -> f64 {
    if n == 0 || d <= 0.0 {
        return 0.0;
    }
    if d >= 1.0 {
        return 1.0;
    }

    let nf = n as f64;
    let k = (nf * d).floor() as usize + 1;
    let m = 2 * k - 1;
    let h = k as f64 - nf * d;

    let mut hm = DMatrix::from_fn(m, m, |i, j| if i + 1 >= j { 1.0 } else { 0.0 });
    for i in 0..m {
        hm[(i, 0)] -= h.powi(i as i32 + 1);
        hm[(m - 1, i)] -= h.powi((m - i) as i32);
    }
    if 2.0 * h - 1.0 > 0.0 {
        hm[(m - 1, 0)] += (2.0 * h - 1.0).powi(m as i32);
    }
    for i in 0..m {
        for j in 0..=i {
            hm[(i, j)] /= factorial(i + 1 - j);
        }
    }

    let (power, mut exponent) = scaled_power(&hm, 0, n);
    let mut s = power[(k - 1, k - 1)];
    for i in 1..=n {
        s = s * i as f64 / nf;
        if s < 1e-140 {
            s *= 1e140;
            exponent -= 140;
        }
    }
    (s * 10f64.powi(exponent)).clamp(0.0, 1.0)
}

/// `base^n` with a decimal exponent carried separately
fn scaled_power(base: &DMatrix<f64>, base_exponent: i32, n: usize) -> (DMatrix<f64>, i32) {
    if n == 1 {
        return (base.clone(), base_exponent);
    }
    let (half, half_exponent) = scaled_power(base, base_exponent, n / 2);
    let squared = &half * &half;
    let (mut result, mut exponent) = if n % 2 == 1 {
        (base * &squared, base_exponent + 2 * half_exponent)
    } else {
        (squared, 2 * half_exponent)
    };

    let centre = base.nrows() / 2;
    if result[(centre, centre)] > 1e140 {
        result *= 1e-140;
        exponent += 140;
    }
    (result, exponent)
}

fn factorial(k: usize) -> f64 {
    (1..=k).fold(1.0, |acc, i| acc * i as f64)
}
