//! CSV loader for annual life-and-death tables
//!
//! Reads one row per (year, age group) and aggregates deaths and population
//! into the configured 5-year period bands.

use std::fs::File;
use std::path::Path;

use csv::{Reader, Trim};
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{MortalityData, RateMatrix};
use crate::config::ModelConfig;
use crate::error::{LeeCarterError, Result};

/// Which population columns of the source table to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopulationSegment {
    Total,
    Male,
    Female,
}

impl PopulationSegment {
    pub fn label(&self) -> &'static str {
        match self {
            PopulationSegment::Total => "total",
            PopulationSegment::Male => "male",
            PopulationSegment::Female => "female",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Year")]
    year: u32,
    #[serde(rename = "Age", default)]
    age: String,
    #[serde(rename = "Total Death")]
    total_death: f64,
    #[serde(rename = "Total Population")]
    total_population: f64,
    #[serde(rename = "Male Death", default)]
    male_death: Option<f64>,
    #[serde(rename = "Male Population", default)]
    male_population: Option<f64>,
    #[serde(rename = "Female Death", default)]
    female_death: Option<f64>,
    #[serde(rename = "Female Population", default)]
    female_population: Option<f64>,
}

impl CsvRow {
    fn counts(&self, segment: PopulationSegment) -> Result<(f64, f64)> {
        let pair = match segment {
            PopulationSegment::Total => Some((self.total_death, self.total_population)),
            PopulationSegment::Male => self.male_death.zip(self.male_population),
            PopulationSegment::Female => self.female_death.zip(self.female_population),
        };
        pair.ok_or_else(|| {
            LeeCarterError::Config(format!(
                "row for year {} age '{}' has no {} columns",
                self.year,
                self.age,
                segment.label()
            ))
        })
    }

    /// Age label as it appears in the catalogue; blank cells denote age 0
    fn age_label(&self) -> &str {
        let age = self.age.trim();
        if age.is_empty() {
            "0"
        } else {
            age
        }
    }
}

/// Load and aggregate a life-and-death table from a CSV file
pub fn load_mortality_data<P: AsRef<Path>>(
    path: P,
    config: &ModelConfig,
    segment: PopulationSegment,
) -> Result<MortalityData> {
    let file = File::open(path.as_ref())?;
    info!("Loading {} mortality data from {}", segment.label(), path.as_ref().display());
    load_mortality_data_from_reader(file, config, segment)
}

/// Load from any reader (e.g., string buffer)
///
/// Rows whose age group or period band is outside the catalogue are skipped;
/// every catalogue cell must receive at least one row.
pub fn load_mortality_data_from_reader<R: std::io::Read>(
    reader: R,
    config: &ModelConfig,
    segment: PopulationSegment,
) -> Result<MortalityData> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(Trim::Headers).from_reader(reader);
    aggregate(&mut csv_reader, config, segment)
}

fn aggregate<R: std::io::Read>(
    reader: &mut Reader<R>,
    config: &ModelConfig,
    segment: PopulationSegment,
) -> Result<MortalityData> {
    let shape = (config.num_ages(), config.periods.len());
    let mut deaths = Array2::<f64>::zeros(shape);
    let mut population = Array2::<f64>::zeros(shape);
    let mut populated = Array2::from_elem(shape, false);
    let mut skipped = 0usize;

    for result in reader.deserialize() {
        let row: CsvRow = result?;
        let period = config.period_for_year(row.year);

        let (Some(i), Some(j)) = (config.age_index(row.age_label()), config.period_index(&period))
        else {
            skipped += 1;
            continue;
        };

        let (d, e) = row.counts(segment)?;
        deaths[[i, j]] += d;
        population[[i, j]] += e;
        populated[[i, j]] = true;
    }

    if let Some(((i, j), _)) = populated.indexed_iter().find(|(_, filled)| !**filled) {
        return Err(LeeCarterError::MissingCell {
            age: config.age_groups[i].clone(),
            period: config.periods[j].clone(),
        });
    }
    debug!("Skipped {skipped} rows outside the age/period catalogue");

    MortalityData::new(
        RateMatrix::new(config.age_groups.clone(), config.periods.clone(), deaths)?,
        RateMatrix::new(config.age_groups.clone(), config.periods.clone(), population)?,
    )
}
