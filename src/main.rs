//! Lee-Carter CLI
//!
//! Loads a life-and-death table, runs the full pipeline for each requested
//! population segment and writes parameters and forecast rates to CSV.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lee_carter::{load_mortality_data, LeeCarterRunner, ModelConfig, PipelineReport, PopulationSegment};
use rayon::prelude::*;
use serde::Serialize;

#[derive(Parser, Debug)]
#[clap(
    name = "lee-carter",
    version,
    about = "Estimate, forecast and validate age-specific mortality with the Lee-Carter model."
)]
struct Args {
    /// Long-format CSV with Year, Age, Total Death, Total Population (and optional Male/Female columns)
    #[clap(long)]
    input: PathBuf,

    /// JSON model configuration; defaults to the New Zealand catalogue
    #[clap(long)]
    config: Option<PathBuf>,

    /// Population segment to model; repeat for several
    #[clap(long, value_enum)]
    segment: Vec<Segment>,

    /// Directory for per-segment CSV output
    #[clap(long, default_value = ".")]
    output_dir: PathBuf,

    /// Print the full report as JSON instead of a summary
    #[clap(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Segment {
    Total,
    Male,
    Female,
}

impl From<Segment> for PopulationSegment {
    fn from(segment: Segment) -> Self {
        match segment {
            Segment::Total => PopulationSegment::Total,
            Segment::Male => PopulationSegment::Male,
            Segment::Female => PopulationSegment::Female,
        }
    }
}

#[derive(Serialize)]
struct ParameterRow<'a> {
    #[serde(rename = "Method")]
    method: &'a str,
    #[serde(rename = "Age")]
    age: &'a str,
    #[serde(rename = "AgeEffect")]
    age_effect: f64,
    #[serde(rename = "AgeSensitivity")]
    age_sensitivity: f64,
}

#[derive(Serialize)]
struct TimeIndexRow<'a> {
    #[serde(rename = "Method")]
    method: &'a str,
    #[serde(rename = "Period")]
    period: &'a str,
    #[serde(rename = "TimeIndex")]
    time_index: f64,
}

#[derive(Serialize)]
struct ForecastRow<'a> {
    #[serde(rename = "ForecastMethod")]
    method: &'a str,
    #[serde(rename = "Age")]
    age: &'a str,
    #[serde(rename = "Period")]
    period: &'a str,
    #[serde(rename = "DeathRate")]
    death_rate: f64,
    #[serde(rename = "MortalityRate")]
    mortality_rate: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let start = Instant::now();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ModelConfig::from_json_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ModelConfig::default(),
    };
    let runner = LeeCarterRunner::new(config).context("Invalid model configuration")?;

    let mut segments: Vec<PopulationSegment> = Vec::new();
    for &segment in &args.segment {
        if !segments.contains(&segment.into()) {
            segments.push(segment.into());
        }
    }
    if segments.is_empty() {
        segments.push(PopulationSegment::Total);
    }

    // One pipeline per segment
    let reports: Vec<(PopulationSegment, PipelineReport)> = segments
        .par_iter()
        .map(|&segment| -> Result<(PopulationSegment, PipelineReport)> {
            let data = load_mortality_data(&args.input, runner.config(), segment)
                .with_context(|| format!("Failed to load {} data from {}", segment.label(), args.input.display()))?;
            let report = runner
                .run(&data)
                .with_context(|| format!("Pipeline failed for {} population", segment.label()))?;
            Ok((segment, report))
        })
        .collect::<Result<Vec<_>>>()?;

    if args.json {
        let by_segment: BTreeMap<&str, &PipelineReport> =
            reports.iter().map(|(segment, report)| (segment.label(), report)).collect();
        println!("{}", serde_json::to_string_pretty(&by_segment)?);
    } else {
        for (segment, report) in &reports {
            print_summary(*segment, report);
        }
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    for (segment, report) in &reports {
        write_outputs(&args.output_dir, *segment, report)?;
    }

    eprintln!("Completed in {:?}", start.elapsed());
    Ok(())
}

fn print_summary(segment: PopulationSegment, report: &PipelineReport) {
    println!("\n{} population", segment.label());
    println!("{}", "=".repeat(60));
    println!(
        "Calibration periods: {}..{}",
        report.historical_periods.first().map(String::as_str).unwrap_or("-"),
        report.historical_periods.last().map(String::as_str).unwrap_or("-")
    );

    println!("\n{:<28} {:>10}  {}", "In-sample", "MAPE %", "Accuracy");
    println!("{}", "-".repeat(60));
    for calibration in &report.calibrations {
        let status = &calibration.calibration.status;
        let name = if status.converged {
            status.method.label().to_string()
        } else {
            format!("{} (not converged)", status.method.label())
        };
        println!(
            "{:<28} {:>10.2}  {}",
            name, calibration.accuracy.aggregate_mape, calibration.accuracy.band
        );
    }
    if let Some(gm) = &report.gompertz_makeham {
        println!(
            "{:<28} {:>10.2}  {}",
            "Gompertz-Makeham", gm.accuracy.aggregate_mape, gm.accuracy.band
        );
    }

    if !report.forecasts.is_empty() {
        println!(
            "\n{:<28} {:>10}  {}",
            format!("Forecast ({})", report.forecast_source.label()),
            "MAPE %",
            "Accuracy"
        );
        println!("{}", "-".repeat(60));
        for forecast in &report.forecasts {
            println!(
                "{:<28} {:>10.2}  {}",
                forecast.forecast.method.label(),
                forecast.accuracy.aggregate_mape,
                forecast.accuracy.band
            );
        }
    }
}

fn write_outputs(dir: &Path, segment: PopulationSegment, report: &PipelineReport) -> Result<()> {
    let prefix = segment.label();

    let path = dir.join(format!("{prefix}_parameters.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for calibration in &report.calibrations {
        let params = &calibration.calibration.parameters;
        for (x, age) in params.ages.iter().enumerate() {
            writer.serialize(ParameterRow {
                method: calibration.calibration.status.method.label(),
                age,
                age_effect: params.age_effect[x],
                age_sensitivity: params.age_sensitivity[x],
            })?;
        }
    }
    writer.flush()?;

    let path = dir.join(format!("{prefix}_time_index.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for calibration in &report.calibrations {
        let params = &calibration.calibration.parameters;
        for (t, period) in params.periods.iter().enumerate() {
            writer.serialize(TimeIndexRow {
                method: calibration.calibration.status.method.label(),
                period,
                time_index: params.time_index[t],
            })?;
        }
    }
    writer.flush()?;

    if report.forecasts.is_empty() {
        return Ok(());
    }
    let path = dir.join(format!("{prefix}_forecast_rates.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for forecast in &report.forecasts {
        let death = &forecast.projected.death_rates;
        let mortality = &forecast.projected.mortality_rates;
        for (x, age) in death.ages().iter().enumerate() {
            for (t, period) in death.periods().iter().enumerate() {
                writer.serialize(ForecastRow {
                    method: forecast.forecast.method.label(),
                    age,
                    period,
                    death_rate: death.values()[[x, t]],
                    mortality_rate: mortality.values()[[x, t]],
                })?;
            }
        }
    }
    writer.flush()?;

    println!("\nOutput written to {}/{prefix}_*.csv", dir.display());
    Ok(())
}
