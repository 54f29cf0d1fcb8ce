//! Terminal rendering of thresholds, zones and trends

use colored::*;
use tabled::{settings::Style, Table, Tabled};

use crate::models::{LoadUnit, ThresholdPoint, Thresholds, TrainingZone, TrendPoint};

#[derive(Tabled)]
struct ThresholdRow {
    #[tabled(rename = "Threshold")]
    name: String,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Lactate (mmol/L)")]
    lactate: String,
    #[tabled(rename = "Heart rate")]
    heart_rate: String,
}

#[derive(Tabled)]
struct ZoneRow {
    #[tabled(rename = "Zone")]
    number: u8,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "From")]
    min: String,
    #[tabled(rename = "To")]
    max: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "LT1 load")]
    lt1_load: String,
    #[tabled(rename = "LT1 lactate")]
    lt1_lactate: String,
    #[tabled(rename = "LT2 load")]
    lt2_load: String,
    #[tabled(rename = "LT2 lactate")]
    lt2_lactate: String,
}

/// Unit suffix for loads
pub fn unit_label(unit: LoadUnit) -> &'static str {
    match unit {
        LoadUnit::Watt => "W",
        LoadUnit::Kmh => "km/h",
    }
}

/// Section heading
pub fn heading(text: &str) -> ColoredString {
    text.bold().cyan()
}

fn format_value(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

fn threshold_row(name: &str, point: Option<&ThresholdPoint>, unit: LoadUnit) -> ThresholdRow {
    match point {
        Some(p) => ThresholdRow {
            name: name.to_string(),
            load: format!("{:.1} {}", p.load, unit_label(unit)),
            lactate: format!("{:.2}", p.lactate),
            heart_rate: format_value(p.heart_rate, 0),
        },
        None => ThresholdRow {
            name: name.to_string(),
            load: "not found".to_string(),
            lactate: "-".to_string(),
            heart_rate: "-".to_string(),
        },
    }
}

/// LT1/LT2 table
pub fn thresholds_table(thresholds: &Thresholds, unit: LoadUnit) -> String {
    let rows = vec![
        threshold_row("LT1", thresholds.lt1.as_ref(), unit),
        threshold_row("LT2", thresholds.lt2.as_ref(), unit),
    ];
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Training zone table
pub fn zones_table(zones: &[TrainingZone]) -> String {
    let rows: Vec<ZoneRow> = zones
        .iter()
        .map(|zone| ZoneRow {
            number: zone.number,
            name: zone.name.clone(),
            min: zone.min.round_dp(1).to_string(),
            max: zone.max.round_dp(1).to_string(),
            description: zone.description.clone().unwrap_or_default(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Threshold trend table
pub fn trend_table(points: &[TrendPoint]) -> String {
    let rows: Vec<TrendRow> = points
        .iter()
        .map(|point| TrendRow {
            date: point.created_at.format("%Y-%m-%d").to_string(),
            lt1_load: format_value(point.lt1_load, 1),
            lt1_lactate: format_value(point.lt1_lactate, 2),
            lt2_load: format_value(point.lt2_load, 1),
            lt2_lactate: format_value(point.lt2_lactate, 2),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
