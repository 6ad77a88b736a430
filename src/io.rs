use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::{ReaderBuilder, Trim, Writer};

use crate::engine::{IntervalRecord, RunSummary};
use crate::estimate::ProjectEstimate;
use crate::sampler::PortfolioSimulation;
use crate::EngineError;

pub fn create_timestamped_output_dir(output_root: &Path) -> Result<PathBuf, EngineError> {
    fs::create_dir_all(output_root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = output_root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = output_root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn fmt_f64(value: f64) -> String {
    format!("{value:.10}")
}

/// Reads `id,low,central,high` rows. Records are not validated here so that
/// malformed projects reach the engine's failure policy.
pub fn read_estimates_csv(path: &Path) -> Result<Vec<ProjectEstimate>, EngineError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(path)?;
    let estimates = reader
        .deserialize()
        .collect::<Result<Vec<ProjectEstimate>, csv::Error>>()?;

    if estimates.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    Ok(estimates)
}

pub fn write_estimates_csv(path: &Path, estimates: &[ProjectEstimate]) -> Result<(), EngineError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["id", "low", "central", "high"])?;
    for estimate in estimates {
        writer.write_record([
            estimate.id.clone(),
            fmt_f64(estimate.low),
            fmt_f64(estimate.central),
            fmt_f64(estimate.high),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per scenario: the draw of every sampled project, then the total.
pub fn write_total_samples_csv(
    path: &Path,
    simulation: &PortfolioSimulation,
) -> Result<(), EngineError> {
    let matrix = &simulation.matrix;
    if simulation.total.len() != matrix.draws() {
        return Err(EngineError::LengthMismatch {
            context: "total samples",
            expected: matrix.draws(),
            got: simulation.total.len(),
        });
    }

    let mut writer = Writer::from_path(path)?;
    let mut header = Vec::with_capacity(matrix.project_ids().len() + 2);
    header.push("scenario".to_string());
    header.extend(matrix.project_ids().iter().cloned());
    header.push("total".to_string());
    writer.write_record(&header)?;

    for (scenario, total) in simulation.total.iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(scenario.to_string());
        record.extend(matrix.rows().iter().map(|row| fmt_f64(row[scenario])));
        record.push(fmt_f64(*total));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_intervals_csv(path: &Path, records: &[IntervalRecord]) -> Result<(), EngineError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "model",
        "confidence_level",
        "lower",
        "upper",
        "width",
        "segments",
    ])?;

    for record in records {
        writer.write_record([
            record.model.to_string(),
            fmt_f64(record.confidence_level),
            fmt_f64(record.lower),
            fmt_f64(record.upper),
            fmt_f64(record.width),
            record.segments.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}
