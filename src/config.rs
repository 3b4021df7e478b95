//! Model configuration: age-group catalogue, period axis and solver settings
//!
//! A `ModelConfig` is built once and passed by reference into the loader and
//! the pipeline runner. Nothing in the crate reads a process-wide table, so
//! tests can run the whole model on a three-age, four-period catalogue.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationMethod;
use crate::error::{LeeCarterError, Result};

/// Width of a period band in years
pub const DEFAULT_PERIOD_WIDTH: u32 = 5;

/// Age groups of the New Zealand life and death tables (ages 100+ excluded)
pub const NZ_AGE_GROUPS: [&str; 21] = [
    "0", "01-04", "05-09", "10-14", "15-19", "20-24", "25-29", "30-34",
    "35-39", "40-44", "45-49", "50-54", "55-59", "60-64", "65-69",
    "70-74", "75-79", "80-84", "85-89", "90-94", "95-99",
];

/// Settings for the cyclic Newton-Raphson calibrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonRaphsonConfig {
    /// Hard cap on full update passes
    pub max_iterations: usize,
    /// Stop when every parameter moved less than this in one pass
    pub tolerance: f64,
}

impl Default for NewtonRaphsonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Settings for the BFGS refinement of the SVD time index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KtOptimizerConfig {
    /// Gradient-norm tolerance on the scaled objective
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for KtOptimizerConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-7,
            max_iterations: 500,
        }
    }
}

/// Settings for the per-period Gompertz-Makeham comparison fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GompertzMakehamConfig {
    pub max_iterations: usize,
    /// Stop when one accepted step lowers the SSE by less than this fraction
    pub tolerance: f64,
}

impl Default for GompertzMakehamConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-12,
        }
    }
}

/// Immutable description of the data layout and solver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Ordered age-group labels (matrix rows)
    pub age_groups: Vec<String>,

    /// Ordered period labels (matrix columns), historical and held-out
    pub periods: Vec<String>,

    /// Number of trailing periods held out for forecast validation
    pub holdout_periods: usize,

    /// Width of a period band in calendar years
    pub period_width: u32,

    pub newton_raphson: NewtonRaphsonConfig,

    pub kt_optimizer: KtOptimizerConfig,

    pub gompertz_makeham: GompertzMakehamConfig,

    /// Calibration whose time index is extrapolated
    pub forecast_source: CalibrationMethod,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new_zealand()
    }
}

impl ModelConfig {
    /// Catalogue used for the New Zealand tables: 21 age groups, 1950-2019
    /// in 5-year bands, with 2010-2014 and 2015-2019 held out.
    pub fn new_zealand() -> Self {
        let periods = (0..14)
            .map(|i| period_label(1950 + 5 * i, DEFAULT_PERIOD_WIDTH))
            .collect();

        Self {
            age_groups: NZ_AGE_GROUPS.iter().map(|s| s.to_string()).collect(),
            periods,
            holdout_periods: 2,
            period_width: DEFAULT_PERIOD_WIDTH,
            newton_raphson: NewtonRaphsonConfig::default(),
            kt_optimizer: KtOptimizerConfig::default(),
            gompertz_makeham: GompertzMakehamConfig::default(),
            forecast_source: CalibrationMethod::NewtonRaphson,
        }
    }

    /// Build a config over an arbitrary catalogue with default solver settings
    pub fn with_catalogue<A, P>(age_groups: A, periods: P, holdout_periods: usize) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            age_groups: age_groups.into_iter().map(Into::into).collect(),
            periods: periods.into_iter().map(Into::into).collect(),
            holdout_periods,
            ..Self::new_zealand()
        }
    }

    /// Load a config from a JSON file; missing fields fall back to the New Zealand defaults
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: ModelConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject catalogues the pipeline cannot run on
    pub fn validate(&self) -> Result<()> {
        if self.age_groups.is_empty() {
            return Err(LeeCarterError::Config("age-group catalogue is empty".into()));
        }
        if let Some(dup) = first_duplicate(&self.age_groups) {
            return Err(LeeCarterError::Config(format!("duplicate age group '{dup}'")));
        }
        if let Some(dup) = first_duplicate(&self.periods) {
            return Err(LeeCarterError::Config(format!("duplicate period '{dup}'")));
        }
        if self.periods.len() < self.holdout_periods + 2 {
            return Err(LeeCarterError::Config(format!(
                "{} periods leave fewer than 2 historical periods after holding out {}",
                self.periods.len(),
                self.holdout_periods
            )));
        }
        if self.period_width == 0 {
            return Err(LeeCarterError::Config("period width must be positive".into()));
        }
        if !(self.newton_raphson.tolerance > 0.0)
            || !(self.kt_optimizer.tolerance > 0.0)
            || !(self.gompertz_makeham.tolerance > 0.0)
        {
            return Err(LeeCarterError::Config("solver tolerances must be positive".into()));
        }
        if self.newton_raphson.max_iterations == 0 {
            return Err(LeeCarterError::Config(
                "Newton-Raphson needs at least one iteration".into(),
            ));
        }
        Ok(())
    }

    pub fn num_ages(&self) -> usize {
        self.age_groups.len()
    }

    /// Periods used for calibration
    pub fn historical_periods(&self) -> &[String] {
        let split = self.periods.len().saturating_sub(self.holdout_periods);
        &self.periods[..split]
    }

    /// Held-out periods used for forecast validation
    pub fn comparison_periods(&self) -> &[String] {
        let split = self.periods.len().saturating_sub(self.holdout_periods);
        &self.periods[split..]
    }

    pub fn age_index(&self, label: &str) -> Option<usize> {
        self.age_groups.iter().position(|a| a == label)
    }

    pub fn period_index(&self, label: &str) -> Option<usize> {
        self.periods.iter().position(|p| p == label)
    }

    /// Band label for a calendar year, e.g. 1987 -> "1985-1989"
    pub fn period_for_year(&self, year: u32) -> String {
        period_label(year, self.period_width)
    }

    /// Representative age of each group, in catalogue order
    pub fn age_midpoints(&self) -> Result<Vec<f64>> {
        self.age_groups.iter().map(|label| age_midpoint(label)).collect()
    }
}

/// Label of the band containing `year`
pub fn period_label(year: u32, width: u32) -> String {
    let lower = year - year % width;
    format!("{}-{}", lower, lower + width - 1)
}

/// Midpoint of an age-group label: "0" -> 0, "01-04" -> 2.5, "100+" -> 100
pub fn age_midpoint(label: &str) -> Result<f64> {
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| LeeCarterError::Config(format!("unparseable age group '{label}'")))
    };

    let label = label.trim();
    if let Some((start, end)) = label.split_once('-') {
        Ok((parse(start)? + parse(end)?) / 2.0)
    } else if let Some(open) = label.strip_suffix('+') {
        parse(open)
    } else {
        parse(label)
    }
}

fn first_duplicate(labels: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .find(|label| !seen.insert(label.as_str()))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zealand_catalogue() {
        let config = ModelConfig::new_zealand();
        assert_eq!(config.num_ages(), 21);
        assert_eq!(config.periods.len(), 14);
        assert_eq!(config.periods[0], "1950-1954");
        assert_eq!(config.periods[13], "2015-2019");
        assert_eq!(config.historical_periods().len(), 12);
        assert_eq!(config.comparison_periods(), &["2010-2014", "2015-2019"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_period_bucketing() {
        let config = ModelConfig::new_zealand();
        assert_eq!(config.period_for_year(1950), "1950-1954");
        assert_eq!(config.period_for_year(1954), "1950-1954");
        assert_eq!(config.period_for_year(1987), "1985-1989");
    }

    #[test]
    fn test_age_midpoints() {
        assert_eq!(age_midpoint("0").unwrap(), 0.0);
        assert_eq!(age_midpoint("01-04").unwrap(), 2.5);
        assert_eq!(age_midpoint("95-99").unwrap(), 97.0);
        assert_eq!(age_midpoint("100+").unwrap(), 100.0);
        assert!(age_midpoint("infant").is_err());
    }

    #[test]
    fn test_validate_rejects_short_history() {
        let config = ModelConfig::with_catalogue(["0"], ["2000-2004", "2005-2009"], 1);
        assert!(matches!(config.validate(), Err(LeeCarterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = ModelConfig::with_catalogue(["0", "0"], ["a", "b", "c"], 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "age_groups": ["0", "1"], "periods": ["a", "b", "c"], "holdout_periods": 1 }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_ages(), 2);
        assert_eq!(config.newton_raphson.max_iterations, 100);
        assert_eq!(config.forecast_source, CalibrationMethod::NewtonRaphson);
        assert!(config.validate().is_ok());
    }
}
