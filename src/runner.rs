//! End-to-end estimate → calibrate → forecast → validate loop
//!
//! Holds one validated [`ModelConfig`] and runs every stage over a
//! [`MortalityData`] table without re-reading anything.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::accuracy::{AccuracyEvaluator, AccuracyReport};
use crate::calibration::{
    Calibration, CalibrationMethod, KtObjectiveOptimizer, MortalityCalibrator,
    NewtonRaphsonCalibrator, SvdCalibrator,
};
use crate::config::ModelConfig;
use crate::data::{MortalityData, RateMatrix};
use crate::error::{LeeCarterError, Result};
use crate::forecast::{ForecastResult, TimeIndexForecaster};
use crate::gompertz::{GompertzMakehamFit, GompertzMakehamFitter};
use crate::reconstruct::{RateReconstructor, Reconstruction};

/// One calibration scored in-sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub calibration: Calibration,
    pub fitted: Reconstruction,
    /// Fitted against observed mortality rates over the historical periods
    pub accuracy: AccuracyReport,
}

/// One forecast strategy scored on the held-out periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub forecast: ForecastResult,
    pub projected: Reconstruction,
    pub accuracy: AccuracyReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GompertzMakehamReport {
    pub fits: Vec<GompertzMakehamFit>,
    pub accuracy: AccuracyReport,
}

/// Everything one pipeline run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub historical_periods: Vec<String>,
    pub comparison_periods: Vec<String>,
    pub calibrations: Vec<CalibrationReport>,
    /// Calibration whose time index was forecast
    pub forecast_source: CalibrationMethod,
    /// Empty when no periods are held out
    pub forecasts: Vec<ForecastReport>,
    /// Absent when the catalogue has fewer than three age groups
    pub gompertz_makeham: Option<GompertzMakehamReport>,
}

impl PipelineReport {
    pub fn calibration(&self, method: CalibrationMethod) -> Option<&CalibrationReport> {
        self.calibrations
            .iter()
            .find(|c| c.calibration.status.method == method)
    }
}

/// Pre-configured pipeline runner
#[derive(Debug, Clone)]
pub struct LeeCarterRunner {
    config: ModelConfig,
}

impl LeeCarterRunner {
    /// Validate `config` and build a runner over it
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Both calibrators, SVD first; the SVD path refines k_t against `historical`
    pub fn calibrators(&self, historical: &MortalityData) -> Vec<Box<dyn MortalityCalibrator>> {
        vec![
            Box::new(SvdCalibrator::new().with_refinement(
                historical.clone(),
                KtObjectiveOptimizer::new(self.config.kt_optimizer),
            )),
            Box::new(NewtonRaphsonCalibrator::new(self.config.newton_raphson)),
        ]
    }

    /// Run the whole loop over a table laid out on the configured catalogue
    pub fn run(&self, data: &MortalityData) -> Result<PipelineReport> {
        data.check_catalogue(&self.config)?;
        let (historical, comparison) = data.split_holdout(self.config.holdout_periods)?;

        let death_rates = historical.death_rates()?;
        let observed = historical.mortality_rates()?;
        info!(
            "Calibrating on {} ages x {} periods",
            death_rates.num_ages(),
            death_rates.num_periods()
        );

        let reconstructor = RateReconstructor::new();
        let evaluator = AccuracyEvaluator::new();

        let calibrations = self
            .calibrators(&historical)
            .iter()
            .map(|calibrator| {
                let calibration = calibrator.calibrate(&death_rates)?;
                let fitted = reconstructor.fitted(&calibration.parameters)?;
                let accuracy = evaluator.evaluate(&observed, &fitted.mortality_rates)?;
                info!(
                    "{} in-sample MAPE {:.2}% ({})",
                    calibrator.method().label(),
                    accuracy.aggregate_mape,
                    accuracy.band
                );
                Ok(CalibrationReport { calibration, fitted, accuracy })
            })
            .collect::<Result<Vec<_>>>()?;

        let source = calibrations
            .iter()
            .find(|c| c.calibration.status.method == self.config.forecast_source)
            .ok_or_else(|| {
                LeeCarterError::Config(format!(
                    "no calibration for forecast source {}",
                    self.config.forecast_source.label()
                ))
            })?;

        let forecasts = if self.config.holdout_periods == 0 {
            info!("No held-out periods; skipping forecast validation");
            Vec::new()
        } else {
            self.forecast_and_score(&source.calibration, &comparison.mortality_rates()?)?
        };

        let gompertz_makeham = self.gompertz_makeham(&death_rates, &observed)?;

        Ok(PipelineReport {
            historical_periods: self.config.historical_periods().to_vec(),
            comparison_periods: self.config.comparison_periods().to_vec(),
            calibrations,
            forecast_source: self.config.forecast_source,
            forecasts,
            gompertz_makeham,
        })
    }

    /// Forecast the source time index over the held-out periods and score each strategy
    fn forecast_and_score(&self, source: &Calibration, observed: &RateMatrix) -> Result<Vec<ForecastReport>> {
        let horizon = observed.num_periods();
        let reconstructor = RateReconstructor::new();
        let evaluator = AccuracyEvaluator::new();

        TimeIndexForecaster::new()
            .forecast_all(&source.parameters.time_index, horizon)?
            .into_iter()
            .map(|forecast| {
                let projected =
                    reconstructor.forecast(&source.parameters, &forecast.values, observed.periods())?;
                let accuracy = evaluator.evaluate(observed, &projected.mortality_rates)?;
                info!(
                    "{} forecast MAPE {:.2}% ({})",
                    forecast.method.label(),
                    accuracy.aggregate_mape,
                    accuracy.band
                );
                Ok(ForecastReport { forecast, projected, accuracy })
            })
            .collect()
    }

    fn gompertz_makeham(
        &self,
        death_rates: &RateMatrix,
        observed: &RateMatrix,
    ) -> Result<Option<GompertzMakehamReport>> {
        if self.config.num_ages() < 3 {
            warn!("Gompertz-Makeham comparison needs at least 3 age groups; skipped");
            return Ok(None);
        }

        let midpoints = self.config.age_midpoints()?;
        let comparison = GompertzMakehamFitter::new(self.config.gompertz_makeham).fit(death_rates, &midpoints)?;
        let accuracy = AccuracyEvaluator::new().evaluate(observed, &comparison.reconstruction.mortality_rates)?;
        info!(
            "Gompertz-Makeham in-sample MAPE {:.2}% ({})",
            accuracy.aggregate_mape, accuracy.band
        );

        Ok(Some(GompertzMakehamReport {
            fits: comparison.fits,
            accuracy,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::test_support::*;
    use crate::forecast::ForecastMethod;
    use ndarray::Array2;

    /// Deaths and exposure whose death rates follow the synthetic Lee-Carter surface
    fn synthetic_data() -> MortalityData {
        let m = synthetic_rates();
        let exposure = Array2::from_shape_fn(m.values().dim(), |(x, t)| {
            80_000.0 - 3_000.0 * x as f64 + 1_000.0 * t as f64
        });
        let q = m.values().mapv(|m| -(-m).exp_m1());
        let deaths = &exposure * &q;
        MortalityData::new(
            RateMatrix::from_labels(&AGES, &PERIODS, deaths).unwrap(),
            RateMatrix::from_labels(&AGES, &PERIODS, exposure).unwrap(),
        )
        .unwrap()
    }

    fn config(holdout: usize) -> ModelConfig {
        let mut config = ModelConfig::with_catalogue(AGES, PERIODS, holdout);
        config.newton_raphson.max_iterations = 1_000;
        config
    }

    #[test]
    fn test_full_run() {
        let runner = LeeCarterRunner::new(config(2)).unwrap();
        let report = runner.run(&synthetic_data()).unwrap();

        assert_eq!(report.historical_periods, &["p0", "p1", "p2", "p3"]);
        assert_eq!(report.comparison_periods, &["p4", "p5"]);
        assert_eq!(report.calibrations.len(), 2);

        let nr = report.calibration(CalibrationMethod::NewtonRaphson).unwrap();
        assert!(nr.calibration.status.converged);
        assert!(nr.accuracy.aggregate_mape < 0.1);

        // refinement matches E * m to observed deaths E * q, pulling k_t down slightly
        let svd = report.calibration(CalibrationMethod::Svd).unwrap();
        assert!(svd.accuracy.aggregate_mape < 5.0);
        assert_eq!(svd.accuracy.band, crate::accuracy::AccuracyBand::VeryPrecise);

        assert_eq!(report.forecasts.len(), 2);
        let linear = report
            .forecasts
            .iter()
            .find(|f| f.forecast.method == ForecastMethod::LinearTrend)
            .unwrap();
        // k_t is exactly linear, so the trend extrapolates the held-out periods
        assert!(linear.accuracy.aggregate_mape < 0.5);
        assert_eq!(linear.projected.mortality_rates.periods(), &["p4", "p5"]);

        assert!(report.gompertz_makeham.is_some());
    }

    #[test]
    fn test_no_holdout_skips_forecasts() {
        let runner = LeeCarterRunner::new(config(0)).unwrap();
        let report = runner.run(&synthetic_data()).unwrap();
        assert!(report.forecasts.is_empty());
        assert!(report.comparison_periods.is_empty());
    }

    #[test]
    fn test_catalogue_mismatch() {
        let runner =
            LeeCarterRunner::new(ModelConfig::with_catalogue(["0", "01-04", "05-09"], PERIODS, 2)).unwrap();
        assert!(runner.run(&synthetic_data()).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(LeeCarterRunner::new(ModelConfig::with_catalogue(AGES, ["p0", "p1"], 1)).is_err());
    }

    #[test]
    fn test_report_serialises() {
        let report = LeeCarterRunner::new(config(2)).unwrap().run(&synthetic_data()).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"forecast_source\":\"newton_raphson\""));
    }
}
