//! Re-estimation of k_t so fitted deaths reproduce observed deaths
//!
//! For each period t the model implies
//! `expected(t) = sum_x E(x,t) * exp(a_x + b_x * k_t)`. The optimiser
//! minimises `sum_t (observed(t) - expected(t))^2` over the whole k vector
//! with BFGS, holding a_x and b_x fixed.

use log::{debug, info};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use wolfe_bfgs::{Bfgs, BfgsSolution};

use super::ModelParameters;
use crate::config::KtOptimizerConfig;
use crate::data::MortalityData;
use crate::error::{LeeCarterError, Result};

/// Cost returned to the line search when exp() overflows
const OVERFLOW_COST: f64 = 1e10;

/// BFGS refinement of the time index
#[derive(Debug, Clone, Default)]
pub struct KtObjectiveOptimizer {
    config: KtOptimizerConfig,
}

/// Refined time index and objective values before and after
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KtRefinement {
    pub time_index: Array1<f64>,
    pub initial_objective: f64,
    pub final_objective: f64,
    pub iterations: usize,
}

impl KtObjectiveOptimizer {
    pub fn new(config: KtOptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimise the aggregate-death objective starting from `parameters.time_index`
    ///
    /// Any failure reported by the minimiser is returned as
    /// [`LeeCarterError::OptimizerFailed`]; the initial guess is never
    /// substituted silently.
    pub fn refine(&self, parameters: &ModelParameters, data: &MortalityData) -> Result<KtRefinement> {
        let (n, m) = data.deaths().values().dim();
        if n != parameters.num_ages() || m != parameters.num_periods() {
            return Err(LeeCarterError::shape(
                "k_t objective",
                format!("{} x {}", parameters.num_ages(), parameters.num_periods()),
                format!("{n} x {m}"),
            ));
        }

        let objective = DeathObjective::new(parameters, data);
        let initial_objective = objective.value(&parameters.time_index);
        debug!("Initial k_t objective {initial_objective:.6e}");

        let BfgsSolution {
            final_point,
            iterations,
            ..
        } = Bfgs::new(parameters.time_index.clone(), |k: &Array1<f64>| objective.scaled_cost_and_grad(k))
            .with_tolerance(self.config.tolerance)
            .with_max_iterations(self.config.max_iterations)
            .run()
            .map_err(|e| LeeCarterError::OptimizerFailed(format!("BFGS failed: {e:?}")))?;

        if final_point.iter().any(|v| !v.is_finite()) {
            return Err(LeeCarterError::OptimizerFailed(
                "BFGS returned a non-finite time index".into(),
            ));
        }

        let final_objective = objective.value(&final_point);
        info!(
            "k_t refinement: objective {initial_objective:.6e} -> {final_objective:.6e} in {iterations} iterations"
        );

        Ok(KtRefinement {
            time_index: final_point,
            initial_objective,
            final_objective,
            iterations,
        })
    }
}

/// Sum of squared differences between observed and expected deaths per period
pub fn aggregate_death_objective(
    parameters: &ModelParameters,
    data: &MortalityData,
    time_index: &Array1<f64>,
) -> f64 {
    DeathObjective::new(parameters, data).value(time_index)
}

struct DeathObjective<'a> {
    age_effect: &'a Array1<f64>,
    age_sensitivity: &'a Array1<f64>,
    exposure: &'a ndarray::Array2<f64>,
    observed: Array1<f64>,
    /// Divides cost and gradient so BFGS tolerances are relative to the death counts
    scale: f64,
}

impl<'a> DeathObjective<'a> {
    fn new(parameters: &'a ModelParameters, data: &'a MortalityData) -> Self {
        let observed = data.deaths().values().sum_axis(Axis(0));
        let scale = observed.mapv(|d| d * d).sum().max(1.0);
        Self {
            age_effect: &parameters.age_effect,
            age_sensitivity: &parameters.age_sensitivity,
            exposure: data.exposure().values(),
            observed,
            scale,
        }
    }

    /// Expected deaths in period t and its derivative with respect to k_t
    fn expected(&self, t: usize, k: f64) -> (f64, f64) {
        let mut deaths = 0.0;
        let mut slope = 0.0;
        for x in 0..self.age_effect.len() {
            let d = self.exposure[[x, t]] * (self.age_effect[x] + self.age_sensitivity[x] * k).exp();
            deaths += d;
            slope += d * self.age_sensitivity[x];
        }
        (deaths, slope)
    }

    fn value(&self, k: &Array1<f64>) -> f64 {
        k.iter()
            .enumerate()
            .map(|(t, &kt)| {
                let residual = self.observed[t] - self.expected(t, kt).0;
                residual * residual
            })
            .sum()
    }

    fn scaled_cost_and_grad(&self, k: &Array1<f64>) -> (f64, Array1<f64>) {
        let mut cost = 0.0;
        let mut grad = Array1::zeros(k.len());
        for (t, &kt) in k.iter().enumerate() {
            let (expected, slope) = self.expected(t, kt);
            let residual = self.observed[t] - expected;
            cost += residual * residual;
            grad[t] = -2.0 * residual * slope;
        }

        cost /= self.scale;
        grad /= self.scale;
        if !cost.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return (OVERFLOW_COST, Array1::zeros(k.len()));
        }
        (cost, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::test_support::*;
    use crate::calibration::ModelParameters;
    use crate::data::RateMatrix;
    use ndarray::Array2;

    fn true_parameters() -> ModelParameters {
        ModelParameters::new(
            AGES.iter().map(|s| s.to_string()).collect(),
            PERIODS.iter().map(|s| s.to_string()).collect(),
            true_age_effect(),
            true_sensitivity(),
            true_time_index(),
        )
        .unwrap()
    }

    /// Deaths generated exactly from the true parameters
    fn exact_data() -> MortalityData {
        let rates = synthetic_rates();
        let exposure = Array2::from_shape_fn(rates.values().dim(), |(x, t)| {
            50_000.0 + 2_000.0 * x as f64 + 500.0 * t as f64
        });
        let deaths = &exposure * rates.values();
        MortalityData::new(
            RateMatrix::from_labels(&AGES, &PERIODS, deaths).unwrap(),
            RateMatrix::from_labels(&AGES, &PERIODS, exposure).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_objective_zero_at_truth() {
        let params = true_parameters();
        let value = aggregate_death_objective(&params, &exact_data(), &params.time_index);
        assert!(value < 1e-12, "objective at truth: {value}");
    }

    #[test]
    fn test_refinement_recovers_time_index() {
        let mut start = true_parameters();
        start.time_index = start.time_index.mapv(|k| k + 0.3);

        let refined = KtObjectiveOptimizer::default()
            .refine(&start, &exact_data())
            .unwrap();

        assert!(refined.final_objective < refined.initial_objective);
        assert_eq!(refined.time_index.len(), PERIODS.len());
        for (k, expected) in refined.time_index.iter().zip(true_time_index().iter()) {
            assert!((k - expected).abs() < 1e-3, "k_t {k} vs {expected}");
        }
    }

    #[test]
    fn test_optimizer_failure_is_surfaced() {
        let mut start = true_parameters();
        start.time_index = start.time_index.mapv(|k| k + 3.0);

        let optimizer = KtObjectiveOptimizer::new(KtOptimizerConfig {
            tolerance: 1e-30,
            max_iterations: 1,
        });
        let result = optimizer.refine(&start, &exact_data());
        assert!(matches!(result, Err(LeeCarterError::OptimizerFailed(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut params = true_parameters();
        params.periods.pop();
        params.time_index = params.time_index.slice(ndarray::s![..5]).to_owned();
        let result = KtObjectiveOptimizer::default().refine(&params, &exact_data());
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }
}
