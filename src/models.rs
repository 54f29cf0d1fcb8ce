use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LactrsError;

/// Single (load, lactate) measurement of an incremental test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Power in watts or speed in km/h, depending on the protocol unit
    pub load: f64,

    /// Blood lactate concentration in mmol/L
    pub lactate: f64,

    /// Heart rate at the end of the stage
    #[serde(default)]
    pub heart_rate: Option<u16>,

    /// Stage number (1-based)
    #[serde(default)]
    pub stage: Option<u32>,

    /// Actual stage duration in minutes
    #[serde(default)]
    pub duration_min: Option<f64>,
}

impl Sample {
    pub fn new(load: f64, lactate: f64) -> Self {
        Sample {
            load,
            lactate,
            heart_rate: None,
            stage: None,
            duration_min: None,
        }
    }

    pub fn with_heart_rate(mut self, heart_rate: u16) -> Self {
        self.heart_rate = Some(heart_rate);
        self
    }

    /// Load and lactate are both finite and non-negative
    pub fn is_valid(&self) -> bool {
        self.load.is_finite() && self.load >= 0.0 && self.lactate.is_finite() && self.lactate >= 0.0
    }
}

/// Stage row as supplied by the stage-storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRow {
    /// Stage number (1-based, unique within a test)
    pub stage: u32,

    /// Raw load set by the protocol
    pub load: Option<f64>,

    /// Lactate in mmol/L
    pub lactate: Option<f64>,

    /// Heart rate in bpm
    pub heart_rate: Option<u16>,

    /// Actual duration in minutes
    pub duration_min: Option<f64>,

    /// True when `theoretical_load` replaced the raw load of a cut-short stage
    pub is_final_approximation: bool,

    /// Load extrapolated for a full-duration stage
    pub theoretical_load: Option<f64>,
}

impl StageRow {
    pub fn new(stage: u32, load: f64, lactate: f64) -> Self {
        StageRow {
            stage,
            load: Some(load),
            lactate: Some(lactate),
            heart_rate: None,
            duration_min: None,
            is_final_approximation: false,
            theoretical_load: None,
        }
    }

    /// Load used for threshold detection: the theoretical load of a corrected stage, else the raw load
    pub fn effective_load(&self) -> Option<f64> {
        if self.is_final_approximation {
            self.theoretical_load.or(self.load)
        } else {
            self.load
        }
    }

    /// Convert into a sample; rows missing load or lactate yield `None`
    pub fn to_sample(&self) -> Option<Sample> {
        Some(Sample {
            load: self.effective_load()?,
            lactate: self.lactate?,
            heart_rate: self.heart_rate,
            stage: Some(self.stage),
            duration_min: self.duration_min,
        })
    }
}

/// Ordered stage rows for one test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSeries {
    pub test_id: String,
    pub stages: Vec<StageRow>,
}

impl StageSeries {
    pub fn new(test_id: impl Into<String>, mut stages: Vec<StageRow>) -> Self {
        stages.sort_by_key(|row| row.stage);
        stages.dedup_by_key(|row| row.stage);
        StageSeries {
            test_id: test_id.into(),
            stages,
        }
    }

    /// Replace the row with the same stage number or insert it in order.
    /// Returns true when an existing row was replaced.
    pub fn insert_or_replace(&mut self, row: StageRow) -> bool {
        match self.stages.binary_search_by_key(&row.stage, |r| r.stage) {
            Ok(pos) => {
                self.stages[pos] = row;
                true
            }
            Err(pos) => {
                self.stages.insert(pos, row);
                false
            }
        }
    }

    pub fn get(&self, stage: u32) -> Option<&StageRow> {
        self.stages
            .binary_search_by_key(&stage, |r| r.stage)
            .ok()
            .map(|pos| &self.stages[pos])
    }

    /// Valid samples in stage order
    pub fn samples(&self) -> Vec<Sample> {
        self.stages
            .iter()
            .filter_map(StageRow::to_sample)
            .filter(Sample::is_valid)
            .collect()
    }

    /// Highest effective load in the series
    pub fn max_load(&self) -> Option<f64> {
        self.samples()
            .iter()
            .map(|s| s.load)
            .fold(None, |acc: Option<f64>, load| Some(acc.map_or(load, |m| m.max(load))))
    }
}

/// A breakpoint on the load/lactate curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPoint {
    #[serde(rename = "power")]
    pub load: f64,
    pub lactate: f64,
    #[serde(default, rename = "heartRate", skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
}

impl ThresholdPoint {
    pub fn new(load: f64, lactate: f64) -> Self {
        ThresholdPoint {
            load,
            lactate,
            heart_rate: None,
        }
    }
}

/// LT1/LT2 pair; either may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub lt1: Option<ThresholdPoint>,
    pub lt2: Option<ThresholdPoint>,
}

impl Thresholds {
    pub fn none() -> Self {
        Thresholds { lt1: None, lt2: None }
    }

    pub fn is_empty(&self) -> bool {
        self.lt1.is_none() && self.lt2.is_none()
    }
}

/// Protocol load unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadUnit {
    Watt,
    Kmh,
}

impl fmt::Display for LoadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadUnit::Watt => write!(f, "watt"),
            LoadUnit::Kmh => write!(f, "kmh"),
        }
    }
}

impl FromStr for LoadUnit {
    type Err = LactrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "watt" | "w" => Ok(LoadUnit::Watt),
            "kmh" | "km/h" => Ok(LoadUnit::Kmh),
            other => Err(LactrsError::Configuration(format!("Unknown load unit: {}", other))),
        }
    }
}

/// Protocol constants of a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestProtocol {
    /// Target stage duration in minutes
    pub stage_duration_min: f64,
    pub unit: LoadUnit,
    /// Closed tests no longer accept stage amendments
    pub closed: bool,
}

/// A stored lactate test with its stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LactateTest {
    pub id: String,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
    pub protocol: TestProtocol,
    pub stages: Vec<StageRow>,
}

impl LactateTest {
    pub fn series(&self) -> StageSeries {
        StageSeries::new(self.id.clone(), self.stages.clone())
    }
}

/// Extrapolated full-duration load of a cut-short stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TheoreticalLoadResult {
    pub theoretical_load: f64,
    pub is_final_approximation: bool,
}

/// Zone model tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneModel {
    #[serde(rename = "5-zones")]
    FiveZones,
    #[serde(rename = "3-zones-a")]
    ThreeZonesA,
    #[serde(rename = "3-zones-b")]
    ThreeZonesB,
}

impl ZoneModel {
    pub fn tag(&self) -> &'static str {
        match self {
            ZoneModel::FiveZones => "5-zones",
            ZoneModel::ThreeZonesA => "3-zones-a",
            ZoneModel::ThreeZonesB => "3-zones-b",
        }
    }
}

impl fmt::Display for ZoneModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ZoneModel {
    type Err = LactrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "5-zones" => Ok(ZoneModel::FiveZones),
            "3-zones-a" => Ok(ZoneModel::ThreeZonesA),
            "3-zones-b" => Ok(ZoneModel::ThreeZonesB),
            _ => Err(LactrsError::UnknownZoneModel { tag: s.to_string() }),
        }
    }
}

/// Training zone on the load axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingZone {
    /// Zone number (1-based)
    pub number: u8,

    pub name: String,

    /// Lower bound (exclusive except for zone 1)
    pub min: Decimal,

    /// Upper bound (inclusive)
    pub max: Decimal,

    pub description: Option<String>,
}

/// Threshold values of one historical test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub created_at: DateTime<Utc>,
    pub lt1_load: Option<f64>,
    pub lt1_lactate: Option<f64>,
    pub lt2_load: Option<f64>,
    pub lt2_lactate: Option<f64>,
}

/// Threshold time series split by protocol unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub watt: Vec<TrendPoint>,
    pub kmh: Vec<TrendPoint>,
}
