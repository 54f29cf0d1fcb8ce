//! Stage files for the command line
//!
//! CSV files need a header row; column names are matched case-insensitively
//! with common variations (`power`, `watts` and `speed` for the load, `la`
//! for lactate, `hr` for heart rate). JSON files hold an array of stage
//! objects in either snake_case or the camelCase of the stage-storage rows.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{InputError, Result};
use crate::models::StageRow;

/// Supported stage file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFileFormat {
    Csv,
    Json,
}

impl StageFileFormat {
    /// Detect format from the file extension
    pub fn detect(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(StageFileFormat::Csv),
            "json" => Ok(StageFileFormat::Json),
            other => Err(InputError::UnsupportedFormat {
                format: if other.is_empty() { "(none)".to_string() } else { other.to_string() },
            }
            .into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StageRecord {
    #[serde(default)]
    stage: Option<u32>,
    #[serde(default, alias = "power", alias = "watts", alias = "speed")]
    load: Option<f64>,
    #[serde(default, alias = "la", alias = "lactate_mmol", alias = "lactateMmol")]
    lactate: Option<f64>,
    #[serde(default, alias = "hr", alias = "heartRateBpm")]
    heart_rate: Option<u16>,
    #[serde(default, alias = "duration", alias = "durationMin")]
    duration_min: Option<f64>,
    #[serde(default, alias = "isFinalApproximation")]
    is_final_approximation: Option<bool>,
    #[serde(default, alias = "theoreticalLoad")]
    theoretical_load: Option<f64>,
}

impl StageRecord {
    fn into_row(self, position: usize) -> StageRow {
        StageRow {
            stage: self.stage.unwrap_or(position as u32 + 1),
            load: self.load,
            lactate: self.lactate,
            heart_rate: self.heart_rate,
            duration_min: self.duration_min,
            is_final_approximation: self.is_final_approximation.unwrap_or(false),
            theoretical_load: self.theoretical_load,
        }
    }
}

/// Read stage rows from a CSV or JSON file. Rows without a stage number are
/// numbered by position.
pub fn read_stage_file(path: &Path) -> Result<Vec<StageRow>> {
    let format = StageFileFormat::detect(path)?;
    let content = fs::read_to_string(path)?;
    let rows = parse_stages(&content, format).map_err(|reason| InputError::ParseError {
        path: path.to_path_buf(),
        reason,
    })?;
    debug!(path = %path.display(), rows = rows.len(), "Read stage file");
    Ok(rows)
}

/// Parse stage rows from file content
pub fn parse_stages(content: &str, format: StageFileFormat) -> std::result::Result<Vec<StageRow>, String> {
    let records = match format {
        StageFileFormat::Csv => parse_csv(content)?,
        StageFileFormat::Json => serde_json::from_str::<Vec<StageRecord>>(content).map_err(|e| e.to_string())?,
    };
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, record)| record.into_row(i))
        .collect())
}

fn parse_csv(content: &str) -> std::result::Result<Vec<StageRecord>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let normalized: csv::StringRecord = headers.iter().map(normalize_column_name).collect();
    reader.set_headers(normalized);

    reader
        .deserialize::<StageRecord>()
        .enumerate()
        .map(|(i, record)| record.map_err(|e| format!("row {}: {}", i + 1, e)))
        .collect()
}

fn normalize_column_name(name: &str) -> String {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "lactate_mmol_l" | "lactate_(mmol/l)" => "lactate".to_string(),
        "heart_rate_bpm" | "heartrate" | "bpm" => "heart_rate".to_string(),
        "power_w" | "speed_kmh" | "speed_km/h" => "load".to_string(),
        "duration_minutes" | "time_min" => "duration_min".to_string(),
        _ => normalized,
    }
}
