//! Age × period tables of deaths, exposures and rates
//!
//! Rows follow the configured age-group catalogue and columns the period
//! labels. Tables are validated on construction and never mutated after.

pub mod loader;

pub use loader::{load_mortality_data, load_mortality_data_from_reader, PopulationSegment};

use ndarray::{s, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{LeeCarterError, Result};

/// Labelled, non-negative table indexed by age group (rows) and period (columns)
///
/// Holds mortality rates q, death rates m, or the raw death and exposure
/// counts they are derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMatrix {
    ages: Vec<String>,
    periods: Vec<String>,
    values: Array2<f64>,
}

impl RateMatrix {
    /// Build a table, checking label counts against the value shape and
    /// rejecting negative or non-finite entries
    pub fn new(ages: Vec<String>, periods: Vec<String>, values: Array2<f64>) -> Result<Self> {
        let (rows, cols) = values.dim();
        if rows != ages.len() || cols != periods.len() {
            return Err(LeeCarterError::shape(
                "RateMatrix::new",
                format!("{} x {}", ages.len(), periods.len()),
                format!("{rows} x {cols}"),
            ));
        }

        if let Some(((i, j), v)) = values
            .indexed_iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(LeeCarterError::Domain(format!(
                "value {v} at age {} / period {} is negative or not finite",
                ages[i], periods[j]
            )));
        }

        Ok(Self { ages, periods, values })
    }

    /// Convenience constructor from string slices
    pub fn from_labels(ages: &[&str], periods: &[&str], values: Array2<f64>) -> Result<Self> {
        Self::new(
            ages.iter().map(|s| s.to_string()).collect(),
            periods.iter().map(|s| s.to_string()).collect(),
            values,
        )
    }

    pub fn ages(&self) -> &[String] {
        &self.ages
    }

    pub fn periods(&self) -> &[String] {
        &self.periods
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn num_ages(&self) -> usize {
        self.ages.len()
    }

    pub fn num_periods(&self) -> usize {
        self.periods.len()
    }

    /// Look up one cell by labels
    pub fn get(&self, age: &str, period: &str) -> Option<f64> {
        let i = self.ages.iter().position(|a| a == age)?;
        let j = self.periods.iter().position(|p| p == period)?;
        Some(self.values[[i, j]])
    }

    /// All periods of one age group
    pub fn row(&self, age: &str) -> Option<ArrayView1<'_, f64>> {
        let i = self.ages.iter().position(|a| a == age)?;
        Some(self.values.row(i))
    }

    /// Split off the last `holdout` periods as a comparison table
    pub fn split_holdout(&self, holdout: usize) -> Result<(RateMatrix, RateMatrix)> {
        if holdout >= self.num_periods() {
            return Err(LeeCarterError::shape(
                "RateMatrix::split_holdout",
                format!("fewer than {} held-out periods", self.num_periods()),
                holdout,
            ));
        }
        let split = self.num_periods() - holdout;

        let historical = RateMatrix {
            ages: self.ages.clone(),
            periods: self.periods[..split].to_vec(),
            values: self.values.slice(s![.., ..split]).to_owned(),
        };
        let comparison = RateMatrix {
            ages: self.ages.clone(),
            periods: self.periods[split..].to_vec(),
            values: self.values.slice(s![.., split..]).to_owned(),
        };
        Ok((historical, comparison))
    }

    /// Columns in `range`, by position
    pub fn select_periods(&self, range: std::ops::Range<usize>) -> Result<RateMatrix> {
        if range.start > range.end || range.end > self.num_periods() {
            return Err(LeeCarterError::shape(
                "RateMatrix::select_periods",
                format!("range within 0..{}", self.num_periods()),
                format!("{}..{}", range.start, range.end),
            ));
        }
        Ok(RateMatrix {
            ages: self.ages.clone(),
            periods: self.periods[range.clone()].to_vec(),
            values: self.values.slice(s![.., range]).to_owned(),
        })
    }

    /// Apply `f` to every value, revalidating the result
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Result<RateMatrix> {
        self.with_values(self.values.mapv(f))
    }

    /// Natural log of every rate, requiring each rate to lie strictly in (0, 1)
    pub fn log_rates(&self) -> Result<Array2<f64>> {
        if let Some(((i, j), v)) = self
            .values
            .indexed_iter()
            .find(|(_, v)| **v <= 0.0 || **v >= 1.0)
        {
            return Err(LeeCarterError::Domain(format!(
                "rate {v} at age {} / period {} is outside (0, 1); its logarithm is undefined for the model",
                self.ages[i], self.periods[j]
            )));
        }
        Ok(self.values.mapv(f64::ln))
    }

    /// Check rows against the configured catalogue, in order
    pub fn check_catalogue(&self, config: &ModelConfig) -> Result<()> {
        if self.ages != config.age_groups {
            return Err(LeeCarterError::shape(
                "age-group catalogue",
                config.age_groups.join(","),
                self.ages.join(","),
            ));
        }
        Ok(())
    }

    /// Same labels, new values; used for transforms that preserve validity
    pub(crate) fn with_values(&self, values: Array2<f64>) -> Result<RateMatrix> {
        RateMatrix::new(self.ages.clone(), self.periods.clone(), values)
    }

    pub(crate) fn same_layout(&self, other: &RateMatrix) -> bool {
        self.ages == other.ages && self.periods == other.periods
    }
}

/// Death counts and exposure (population at risk) over the same layout
#[derive(Debug, Clone, PartialEq)]
pub struct MortalityData {
    deaths: RateMatrix,
    exposure: RateMatrix,
}

impl MortalityData {
    pub fn new(deaths: RateMatrix, exposure: RateMatrix) -> Result<Self> {
        if !deaths.same_layout(&exposure) {
            return Err(LeeCarterError::shape(
                "MortalityData::new",
                format!("{} x {}", deaths.num_ages(), deaths.num_periods()),
                format!("{} x {}", exposure.num_ages(), exposure.num_periods()),
            ));
        }
        Ok(Self { deaths, exposure })
    }

    pub fn deaths(&self) -> &RateMatrix {
        &self.deaths
    }

    pub fn exposure(&self) -> &RateMatrix {
        &self.exposure
    }

    /// Crude mortality rate q = D / E
    pub fn mortality_rates(&self) -> Result<RateMatrix> {
        if let Some(((i, j), _)) = self
            .exposure
            .values
            .indexed_iter()
            .find(|(_, e)| **e <= 0.0)
        {
            return Err(LeeCarterError::Domain(format!(
                "zero exposure at age {} / period {}",
                self.exposure.ages[i], self.exposure.periods[j]
            )));
        }
        let q = &self.deaths.values / &self.exposure.values;
        self.deaths.with_values(q)
    }

    /// Death rate (force of mortality) m = ln(1 / (1 - q))
    pub fn death_rates(&self) -> Result<RateMatrix> {
        let q = self.mortality_rates()?;
        if let Some(((i, j), v)) = q.values.indexed_iter().find(|(_, v)| **v >= 1.0) {
            return Err(LeeCarterError::Domain(format!(
                "mortality rate {v} at age {} / period {} leaves no survivors",
                q.ages[i], q.periods[j]
            )));
        }
        q.with_values(q.values.mapv(|q| -(1.0 - q).ln()))
    }

    /// Split into historical and comparison data
    pub fn split_holdout(&self, holdout: usize) -> Result<(MortalityData, MortalityData)> {
        let (deaths_hist, deaths_cmp) = self.deaths.split_holdout(holdout)?;
        let (exposure_hist, exposure_cmp) = self.exposure.split_holdout(holdout)?;
        Ok((
            MortalityData { deaths: deaths_hist, exposure: exposure_hist },
            MortalityData { deaths: deaths_cmp, exposure: exposure_cmp },
        ))
    }

    pub fn check_catalogue(&self, config: &ModelConfig) -> Result<()> {
        self.deaths.check_catalogue(config)?;
        if self.deaths.periods != config.periods {
            return Err(LeeCarterError::shape(
                "period axis",
                config.periods.join(","),
                self.deaths.periods.join(","),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample() -> RateMatrix {
        RateMatrix::from_labels(
            &["0", "01-04"],
            &["1950-1954", "1955-1959", "1960-1964"],
            array![[0.02, 0.015, 0.01], [0.004, 0.003, 0.002]],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_checked() {
        let result = RateMatrix::from_labels(&["0"], &["a", "b"], array![[0.1, 0.2, 0.3]]);
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }

    #[test]
    fn test_negative_rejected() {
        let result = RateMatrix::from_labels(&["0"], &["a"], array![[-0.1]]);
        assert!(matches!(result, Err(LeeCarterError::Domain(_))));
    }

    #[test]
    fn test_lookup_by_label() {
        let m = sample();
        assert_eq!(m.get("01-04", "1955-1959"), Some(0.003));
        assert_eq!(m.get("05-09", "1955-1959"), None);
        assert_eq!(m.row("0").unwrap().len(), 3);
    }

    #[test]
    fn test_split_holdout() {
        let (hist, cmp) = sample().split_holdout(1).unwrap();
        assert_eq!(hist.periods(), &["1950-1954", "1955-1959"]);
        assert_eq!(cmp.periods(), &["1960-1964"]);
        assert_eq!(cmp.values()[[0, 0]], 0.01);
        assert!(sample().split_holdout(3).is_err());
    }

    #[test]
    fn test_select_periods_and_map() {
        let middle = sample().select_periods(1..3).unwrap();
        assert_eq!(middle.periods(), &["1955-1959", "1960-1964"]);
        assert_eq!(middle.values()[[1, 1]], 0.002);
        assert!(sample().select_periods(2..4).is_err());

        let doubled = sample().map(|v| 2.0 * v).unwrap();
        assert_eq!(doubled.get("0", "1950-1954"), Some(0.04));
        assert!(sample().map(|v| -v).is_err());
    }

    #[test]
    fn test_log_rates_rejects_one_and_zero() {
        let one = RateMatrix::from_labels(&["0"], &["a", "b"], array![[0.5, 1.0]]).unwrap();
        assert!(matches!(one.log_rates(), Err(LeeCarterError::Domain(_))));

        let zero = RateMatrix::from_labels(&["0"], &["a"], array![[0.0]]).unwrap();
        assert!(matches!(zero.log_rates(), Err(LeeCarterError::Domain(_))));

        let logs = sample().log_rates().unwrap();
        assert_abs_diff_eq!(logs[[0, 0]], 0.02_f64.ln(), epsilon = 1e-15);
    }

    #[test]
    fn test_death_rate_transform() {
        let deaths = RateMatrix::from_labels(&["0"], &["a", "b"], array![[10.0, 50.0]]).unwrap();
        let exposure =
            RateMatrix::from_labels(&["0"], &["a", "b"], array![[1000.0, 1000.0]]).unwrap();
        let data = MortalityData::new(deaths, exposure).unwrap();

        let q = data.mortality_rates().unwrap();
        assert_abs_diff_eq!(q.values()[[0, 1]], 0.05, epsilon = 1e-15);

        let m = data.death_rates().unwrap();
        assert_abs_diff_eq!(m.values()[[0, 0]], (1.0_f64 / 0.99).ln(), epsilon = 1e-15);
        // 1 - exp(-m) recovers q
        assert_abs_diff_eq!(1.0 - (-m.values()[[0, 1]]).exp(), 0.05, epsilon = 1e-15);
    }

    #[test]
    fn test_zero_exposure_is_domain_error() {
        let deaths = RateMatrix::from_labels(&["0"], &["a"], array![[1.0]]).unwrap();
        let exposure = RateMatrix::from_labels(&["0"], &["a"], array![[0.0]]).unwrap();
        let data = MortalityData::new(deaths, exposure).unwrap();
        assert!(matches!(data.mortality_rates(), Err(LeeCarterError::Domain(_))));
    }

    #[test]
    fn test_layout_mismatch() {
        let deaths = RateMatrix::from_labels(&["0"], &["a"], array![[1.0]]).unwrap();
        let exposure = RateMatrix::from_labels(&["1"], &["a"], array![[10.0]]).unwrap();
        assert!(MortalityData::new(deaths, exposure).is_err());
    }
}
