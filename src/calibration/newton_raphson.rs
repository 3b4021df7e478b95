//! Iterative Lee-Carter fit by cyclic Newton-Raphson updates
//!
//! Each pass updates, in this order:
//! 1. a_x from the previous pass's a, b and k (denominator m + 1)
//! 2. k_t from the new a and the previous pass's b and k
//! 3. b_x from the new a and k and the previous pass's b
//!
//! The staging is part of the estimator: a different order or fully fresh
//! values converge to a different fixed point. No normalisation is applied.

use log::{debug, info, warn};
use ndarray::{Array1, Array2};

use super::{Calibration, CalibrationMethod, CalibrationStatus, ModelParameters, MortalityCalibrator};
use crate::config::NewtonRaphsonConfig;
use crate::data::RateMatrix;
use crate::error::{LeeCarterError, Result};

/// Self-contained alternative to the SVD estimator
#[derive(Debug, Clone, Default)]
pub struct NewtonRaphsonCalibrator {
    config: NewtonRaphsonConfig,
}

/// Parameter vectors carried between passes
#[derive(Debug, Clone)]
struct State {
    age_effect: Array1<f64>,
    age_sensitivity: Array1<f64>,
    time_index: Array1<f64>,
}

impl State {
    fn initial(n: usize, m: usize) -> Self {
        Self {
            age_effect: Array1::zeros(n),
            age_sensitivity: Array1::from_elem(n, 1.0 / n as f64),
            time_index: Array1::zeros(m),
        }
    }

    /// Largest absolute change of any parameter relative to `previous`
    fn max_change(&self, previous: &State) -> f64 {
        let diff = |a: &Array1<f64>, b: &Array1<f64>| {
            a.iter().zip(b.iter()).fold(0.0_f64, |acc, (x, y)| acc.max((x - y).abs()))
        };
        diff(&self.age_effect, &previous.age_effect)
            .max(diff(&self.age_sensitivity, &previous.age_sensitivity))
            .max(diff(&self.time_index, &previous.time_index))
    }

    fn is_finite(&self) -> bool {
        self.age_effect
            .iter()
            .chain(self.age_sensitivity.iter())
            .chain(self.time_index.iter())
            .all(|v| v.is_finite())
    }
}

impl NewtonRaphsonCalibrator {
    pub fn new(config: NewtonRaphsonConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NewtonRaphsonConfig {
        &self.config
    }

    /// One full update pass
    fn step(log_rates: &Array2<f64>, previous: &State) -> Result<State> {
        let (n, m) = log_rates.dim();
        let a_old = &previous.age_effect;
        let b_old = &previous.age_sensitivity;
        let k_old = &previous.time_index;

        // a_x from stale b and k
        let mut age_effect = a_old.clone();
        for x in 0..n {
            let sum: f64 = (0..m)
                .map(|t| log_rates[[x, t]] - a_old[x] - b_old[x] * k_old[t])
                .sum();
            age_effect[x] += sum / (m as f64 + 1.0);
        }

        // k_t from new a, stale b and k
        let b_sq: f64 = b_old.iter().map(|b| b * b).sum();
        if b_sq <= 0.0 {
            return Err(LeeCarterError::Degenerate(
                "age sensitivity collapsed to zero".into(),
            ));
        }
        let mut time_index = k_old.clone();
        for t in 0..m {
            let sum: f64 = (0..n)
                .map(|x| b_old[x] * (log_rates[[x, t]] - age_effect[x] - b_old[x] * k_old[t]))
                .sum();
            time_index[t] += sum / b_sq;
        }

        // b_x from new a and k, stale b
        let k_sq: f64 = time_index.iter().map(|k| k * k).sum();
        let mut age_sensitivity = b_old.clone();
        if k_sq > 0.0 {
            for x in 0..n {
                let sum: f64 = (0..m)
                    .map(|t| time_index[t] * (log_rates[[x, t]] - age_effect[x] - b_old[x] * time_index[t]))
                    .sum();
                age_sensitivity[x] += sum / k_sq;
            }
        }

        Ok(State { age_effect, age_sensitivity, time_index })
    }
}

impl MortalityCalibrator for NewtonRaphsonCalibrator {
    fn method(&self) -> CalibrationMethod {
        CalibrationMethod::NewtonRaphson
    }

    fn calibrate(&self, death_rates: &RateMatrix) -> Result<Calibration> {
        let log_rates = death_rates.log_rates()?;
        let (n, m) = log_rates.dim();
        if n == 0 || m == 0 {
            return Err(LeeCarterError::shape(
                "Newton-Raphson input",
                "non-empty matrix",
                format!("{n} x {m}"),
            ));
        }

        let mut state = State::initial(n, m);
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 1..=self.config.max_iterations {
            let next = Self::step(&log_rates, &state)?;
            if !next.is_finite() {
                return Err(LeeCarterError::Degenerate(format!(
                    "Newton-Raphson diverged at iteration {iteration}"
                )));
            }

            let change = next.max_change(&state);
            state = next;
            iterations = iteration;
            debug!("Newton-Raphson iteration {iteration}: max change {change:.3e}");

            if change < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            info!("Newton-Raphson converged in {iterations} iterations");
        } else {
            warn!(
                "Newton-Raphson reached {} iterations without converging; returning last values",
                self.config.max_iterations
            );
        }

        let parameters = ModelParameters::new(
            death_rates.ages().to_vec(),
            death_rates.periods().to_vec(),
            state.age_effect,
            state.age_sensitivity,
            state.time_index,
        )?;

        Ok(Calibration {
            parameters,
            status: CalibrationStatus {
                method: CalibrationMethod::NewtonRaphson,
                converged,
                iterations,
            },
        })
    }
}
