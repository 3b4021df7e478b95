//! Accuracy of reconstructed or forecast rates against observed rates
//!
//! MAD is the mean absolute difference across periods; MAPE is the mean of
//! |observed - fitted| / observed, in percent.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::data::RateMatrix;
use crate::error::{LeeCarterError, Result};

/// Qualitative reading of a MAPE value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyBand {
    VeryPrecise,
    Good,
    Reasonable,
    Imprecise,
}

impl AccuracyBand {
    /// Band for a MAPE given in percent
    pub fn from_mape(mape: f64) -> Self {
        if mape < 10.0 {
            AccuracyBand::VeryPrecise
        } else if mape < 20.0 {
            AccuracyBand::Good
        } else if mape < 50.0 {
            AccuracyBand::Reasonable
        } else {
            AccuracyBand::Imprecise
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccuracyBand::VeryPrecise => "very precise",
            AccuracyBand::Good => "good",
            AccuracyBand::Reasonable => "reasonable",
            AccuracyBand::Imprecise => "imprecise",
        }
    }
}

impl std::fmt::Display for AccuracyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeGroupAccuracy {
    pub age: String,
    pub mad: f64,
    /// Percent
    pub mape: f64,
    pub band: AccuracyBand,
}

/// Aggregate and per-age-group accuracy of one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    /// MAPE over every cell, in percent
    pub aggregate_mape: f64,
    pub band: AccuracyBand,
    pub per_age: Vec<AgeGroupAccuracy>,
}

impl AccuracyReport {
    pub fn age(&self, label: &str) -> Option<&AgeGroupAccuracy> {
        self.per_age.iter().find(|a| a.age == label)
    }
}

/// Scores fitted rates against observed rates of the same layout
#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracyEvaluator;

impl AccuracyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Compare `fitted` to `observed`
    ///
    /// Both tables must carry the same age and period labels. An observed
    /// value of zero makes the percentage error undefined and is rejected.
    pub fn evaluate(&self, observed: &RateMatrix, fitted: &RateMatrix) -> Result<AccuracyReport> {
        if !observed.same_layout(fitted) {
            return Err(LeeCarterError::shape(
                "accuracy comparison",
                format!("{} x {} ({})", observed.num_ages(), observed.num_periods(), observed.periods().join(",")),
                format!("{} x {} ({})", fitted.num_ages(), fitted.num_periods(), fitted.periods().join(",")),
            ));
        }
        if observed.num_periods() == 0 || observed.num_ages() == 0 {
            return Err(LeeCarterError::shape(
                "accuracy comparison",
                "non-empty tables",
                format!("{} x {}", observed.num_ages(), observed.num_periods()),
            ));
        }

        let obs = observed.values();
        if let Some(((i, j), _)) = obs.indexed_iter().find(|(_, v)| **v == 0.0) {
            return Err(LeeCarterError::Domain(format!(
                "observed rate is zero at age {} / period {}; MAPE is undefined",
                observed.ages()[i],
                observed.periods()[j]
            )));
        }

        let abs_diff = (obs - fitted.values()).mapv(f64::abs);
        let pct_error = &abs_diff / obs * 100.0;
        let periods = observed.num_periods() as f64;

        let per_age: Vec<AgeGroupAccuracy> = observed
            .ages()
            .iter()
            .enumerate()
            .map(|(x, age)| {
                let mape = pct_error.row(x).sum() / periods;
                AgeGroupAccuracy {
                    age: age.clone(),
                    mad: abs_diff.row(x).sum() / periods,
                    mape,
                    band: AccuracyBand::from_mape(mape),
                }
            })
            .collect();

        let aggregate_mape = pct_error.sum() / pct_error.len() as f64;
        let band = AccuracyBand::from_mape(aggregate_mape);
        if band == AccuracyBand::Imprecise {
            warn!("aggregate MAPE {aggregate_mape:.1}% is {band}");
        }

        Ok(AccuracyReport { aggregate_mape, band, per_age })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn observed() -> RateMatrix {
        RateMatrix::from_labels(&["0", "01-04"], &["a", "b"], array![[0.10, 0.20], [0.01, 0.02]]).unwrap()
    }

    #[test]
    fn test_self_comparison_is_exact() {
        let report = AccuracyEvaluator::new().evaluate(&observed(), &observed()).unwrap();
        assert_eq!(report.aggregate_mape, 0.0);
        assert_eq!(report.band, AccuracyBand::VeryPrecise);
        for age in &report.per_age {
            assert_eq!(age.mape, 0.0);
            assert_eq!(age.mad, 0.0);
        }
    }

    #[test]
    fn test_metrics() {
        let fitted =
            RateMatrix::from_labels(&["0", "01-04"], &["a", "b"], array![[0.115, 0.18], [0.01, 0.03]]).unwrap();
        let report = AccuracyEvaluator::new().evaluate(&observed(), &fitted).unwrap();

        let infant = report.age("0").unwrap();
        assert_abs_diff_eq!(infant.mad, 0.0175, epsilon = 1e-12);
        assert_abs_diff_eq!(infant.mape, 12.5, epsilon = 1e-9);
        assert_eq!(infant.band, AccuracyBand::Good);

        let child = report.age("01-04").unwrap();
        assert_abs_diff_eq!(child.mad, 0.005, epsilon = 1e-12);
        assert_abs_diff_eq!(child.mape, 25.0, epsilon = 1e-9);
        assert_eq!(child.band, AccuracyBand::Reasonable);

        assert_abs_diff_eq!(report.aggregate_mape, 18.75, epsilon = 1e-9);
        assert_eq!(report.band, AccuracyBand::Good);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(AccuracyBand::from_mape(9.99), AccuracyBand::VeryPrecise);
        assert_eq!(AccuracyBand::from_mape(10.0), AccuracyBand::Good);
        assert_eq!(AccuracyBand::from_mape(20.0), AccuracyBand::Reasonable);
        assert_eq!(AccuracyBand::from_mape(50.0), AccuracyBand::Imprecise);
        assert_eq!(AccuracyBand::Imprecise.label(), "imprecise");
    }

    #[test]
    fn test_zero_observed_rejected() {
        let zero = RateMatrix::from_labels(&["0"], &["a"], array![[0.0]]).unwrap();
        let result = AccuracyEvaluator::new().evaluate(&zero, &zero);
        assert!(matches!(result, Err(LeeCarterError::Domain(_))));
    }

    #[test]
    fn test_layout_mismatch() {
        let other = RateMatrix::from_labels(&["0", "01-04"], &["a", "c"], array![[0.1, 0.2], [0.01, 0.02]]).unwrap();
        let result = AccuracyEvaluator::new().evaluate(&observed(), &other);
        assert!(matches!(result, Err(LeeCarterError::Shape { .. })));
    }
}
