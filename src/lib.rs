//! Lee-Carter mortality modelling: estimation, forecasting and validation
//!
//! This library provides:
//! - Age × period death and exposure tables, loaded from CSV into 5-year bands
//! - Lee-Carter calibration by SVD (with k_t refinement) and by Newton-Raphson
//! - Forecasting of the time index by linear trend or ARIMA(0,1,0)
//! - Reconstruction of death and mortality rates and MAD/MAPE accuracy scoring
//! - A Gompertz-Makeham benchmark fit

pub mod accuracy;
pub mod calibration;
pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod gompertz;
pub mod reconstruct;
pub mod runner;

// Re-export commonly used types
pub use accuracy::{AccuracyBand, AccuracyEvaluator, AccuracyReport};
pub use calibration::{
    Calibration, CalibrationMethod, CalibrationStatus, KtObjectiveOptimizer, ModelParameters,
    MortalityCalibrator, NewtonRaphsonCalibrator, SvdCalibrator,
};
pub use config::ModelConfig;
pub use data::{load_mortality_data, MortalityData, PopulationSegment, RateMatrix};
pub use error::{LeeCarterError, Result};
pub use forecast::{ForecastMethod, ForecastResult, TimeIndexForecaster};
pub use gompertz::GompertzMakehamFitter;
pub use reconstruct::{RateReconstructor, Reconstruction};
pub use runner::{LeeCarterRunner, PipelineReport};
