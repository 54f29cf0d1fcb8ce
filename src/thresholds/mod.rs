//! Lactate threshold detection
//!
//! Turns a series of (load, lactate) samples into the two physiological
//! breakpoints LT1 (aerobic threshold) and LT2 (anaerobic threshold).
//!
//! Methods:
//! - `Dickhuth`: LT1 where lactate rises a fixed delta above its baseline
//!   minimum, LT2 at a fixed 4.0 mmol/L concentration
//! - `Mader`: fixed concentrations (OBLA), 2.0 and 4.0 mmol/L
//! - `Dmax`: LT2 at the maximum distance between a fitted curve and the chord
//!   joining the first and last samples
//! - `ModifiedDmax`: Dmax with the chord starting at the sample preceding the
//!   first marked lactate rise
//!
//! Manually adjusted thresholds are not a detection method; they live at the
//! storage boundary as [`MethodSelection::Adjusted`].
//!
//! Malformed samples are dropped before detection, and fewer than
//! `min_samples` valid samples yields empty thresholds. Nothing in this module
//! fails on numeric input.

mod dmax;
mod fixed;
pub mod polynomial;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{LactrsError, Result};
use crate::models::{Sample, ThresholdPoint, Thresholds};

/// Threshold detection algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMethod {
    Dickhuth,
    Mader,
    Dmax,
    ModifiedDmax,
}

impl ThresholdMethod {
    pub const ALL: [ThresholdMethod; 4] = [
        ThresholdMethod::Dickhuth,
        ThresholdMethod::Mader,
        ThresholdMethod::Dmax,
        ThresholdMethod::ModifiedDmax,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ThresholdMethod::Dickhuth => "dickhuth",
            ThresholdMethod::Mader => "mader",
            ThresholdMethod::Dmax => "dmax",
            ThresholdMethod::ModifiedDmax => "modified-dmax",
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ThresholdMethod {
    type Err = LactrsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dickhuth" => Ok(ThresholdMethod::Dickhuth),
            "mader" | "obla" => Ok(ThresholdMethod::Mader),
            "dmax" => Ok(ThresholdMethod::Dmax),
            "modified-dmax" | "moddmax" => Ok(ThresholdMethod::ModifiedDmax),
            _ => Err(LactrsError::UnknownMethod { tag: s.to_string() }),
        }
    }
}

/// Method selection at the persistence boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodSelection {
    /// Run a detection algorithm
    Computed(ThresholdMethod),
    /// Return the reviewer-supplied thresholds stored for the test
    Adjusted,
}

impl MethodSelection {
    pub fn tag(&self) -> &'static str {
        match self {
            MethodSelection::Computed(method) => method.tag(),
            MethodSelection::Adjusted => "adjusted",
        }
    }
}

impl fmt::Display for MethodSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MethodSelection {
    type Err = LactrsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("adjusted") {
            Ok(MethodSelection::Adjusted)
        } else {
            s.parse().map(MethodSelection::Computed)
        }
    }
}

impl From<ThresholdMethod> for MethodSelection {
    fn from(method: ThresholdMethod) -> Self {
        MethodSelection::Computed(method)
    }
}

/// Lactate constants used by the detection methods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConstants {
    /// Rise above baseline lactate marking LT1 (mmol/L)
    pub lt1_baseline_delta: f64,

    /// Fixed LT2 concentration of the Dickhuth method (mmol/L)
    pub dickhuth_lt2_lactate: f64,

    /// Fixed LT1 concentration of the Mader method (mmol/L)
    pub mader_lt1_lactate: f64,

    /// Fixed LT2 concentration of the Mader method (mmol/L)
    pub mader_lt2_lactate: f64,

    /// Rise between consecutive samples starting the modified Dmax chord (mmol/L)
    pub modified_dmax_rise: f64,

    /// Minimum number of valid samples for any detection
    pub min_samples: usize,
}

impl Default for ThresholdConstants {
    fn default() -> Self {
        ThresholdConstants {
            lt1_baseline_delta: 0.5,
            dickhuth_lt2_lactate: 4.0,
            mader_lt1_lactate: 2.0,
            mader_lt2_lactate: 4.0,
            modified_dmax_rise: 0.4,
            min_samples: 3,
        }
    }
}

/// Threshold detector with configurable constants
#[derive(Debug, Clone, Default)]
pub struct ThresholdDetector {
    constants: ThresholdConstants,
}

impl ThresholdDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constants(constants: ThresholdConstants) -> Self {
        ThresholdDetector { constants }
    }

    pub fn constants(&self) -> &ThresholdConstants {
        &self.constants
    }

    /// Detect LT1/LT2 with the given method
    pub fn detect(&self, samples: &[Sample], method: ThresholdMethod) -> Thresholds {
        let cleaned = clean_samples(samples);
        let min_samples = self.constants.min_samples.max(3);
        if cleaned.len() < min_samples {
            debug!(
                method = %method,
                valid = cleaned.len(),
                total = samples.len(),
                "Not enough valid samples for threshold detection"
            );
            return Thresholds::none();
        }

        let thresholds = match method {
            ThresholdMethod::Dickhuth => fixed::dickhuth(&cleaned, &self.constants),
            ThresholdMethod::Mader => fixed::mader(&cleaned, &self.constants),
            ThresholdMethod::Dmax => dmax::dmax(&cleaned, &self.constants),
            ThresholdMethod::ModifiedDmax => dmax::modified_dmax(&cleaned, &self.constants),
        };

        if thresholds.is_empty() {
            warn!(method = %method, samples = cleaned.len(), "No thresholds found");
        } else {
            debug!(
                method = %method,
                lt1 = ?thresholds.lt1.map(|p| p.load),
                lt2 = ?thresholds.lt2.map(|p| p.load),
                "Thresholds detected"
            );
        }
        thresholds
    }

    /// Detect by method tag; unknown tags are an error
    pub fn detect_named(&self, samples: &[Sample], tag: &str) -> Result<Thresholds> {
        let method: ThresholdMethod = tag.parse()?;
        Ok(self.detect(samples, method))
    }
}

/// Detect LT1/LT2 with default constants
pub fn calculate_thresholds(samples: &[Sample], method: ThresholdMethod) -> Thresholds {
    ThresholdDetector::default().detect(samples, method)
}

/// Drop malformed samples and order by load
fn clean_samples(samples: &[Sample]) -> Vec<Sample> {
    let mut cleaned: Vec<Sample> = samples.iter().filter(|s| s.is_valid()).cloned().collect();
    cleaned.sort_by(|a, b| a.load.total_cmp(&b.load));
    cleaned
}

/// Index of the (first) lowest lactate
fn baseline_index(samples: &[Sample]) -> usize {
    samples
        .iter()
        .enumerate()
        .fold(0, |best, (i, s)| if s.lactate < samples[best].lactate { i } else { best })
}

/// First upward crossing of `target` at or after `from`, linearly interpolated.
/// The returned lactate is `target` exactly.
fn crossing(samples: &[Sample], target: f64, from: usize) -> Option<ThresholdPoint> {
    let start = from.min(samples.len());
    samples[start..].windows(2).find_map(|pair| {
        let (lo, hi) = (&pair[0], &pair[1]);
        if lo.lactate < target && hi.lactate >= target {
            let fraction = (target - lo.lactate) / (hi.lactate - lo.lactate);
            let load = lo.load + fraction * (hi.load - lo.load);
            Some(point_at(samples, load, target))
        } else {
            None
        }
    })
}

/// Threshold point at `load`, with heart rate interpolated when available
fn point_at(samples: &[Sample], load: f64, lactate: f64) -> ThresholdPoint {
    ThresholdPoint {
        load,
        lactate,
        heart_rate: heart_rate_at(samples, load),
    }
}

/// Heart rate at `load`, interpolated between the bracketing samples
fn heart_rate_at(samples: &[Sample], load: f64) -> Option<f64> {
    samples.windows(2).find_map(|pair| {
        let (lo, hi) = (&pair[0], &pair[1]);
        if load < lo.load || load > hi.load {
            return None;
        }
        let (hr_lo, hr_hi) = (f64::from(lo.heart_rate?), f64::from(hi.heart_rate?));
        if hi.load > lo.load {
            Some(hr_lo + (load - lo.load) / (hi.load - lo.load) * (hr_hi - hr_lo))
        } else {
            Some(hr_lo)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn reference_series() -> Vec<Sample> {
        [(100.0, 1.0), (150.0, 1.3), (200.0, 1.8), (250.0, 2.9), (300.0, 4.5), (350.0, 7.0)]
            .iter()
            .map(|&(load, lactate)| Sample::new(load, lactate))
            .collect()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("dickhuth".parse::<ThresholdMethod>().unwrap(), ThresholdMethod::Dickhuth);
        assert_eq!("DMAX".parse::<ThresholdMethod>().unwrap(), ThresholdMethod::Dmax);
        assert_eq!("obla".parse::<ThresholdMethod>().unwrap(), ThresholdMethod::Mader);
        assert_eq!(
            "modified-dmax".parse::<ThresholdMethod>().unwrap(),
            ThresholdMethod::ModifiedDmax
        );

        let err = "adjusted".parse::<ThresholdMethod>().unwrap_err();
        assert!(matches!(err, LactrsError::UnknownMethod { .. }));
        assert!("lt-guess".parse::<ThresholdMethod>().is_err());
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!("adjusted".parse::<MethodSelection>().unwrap(), MethodSelection::Adjusted);
        assert_eq!(
            "dmax".parse::<MethodSelection>().unwrap(),
            MethodSelection::Computed(ThresholdMethod::Dmax)
        );
        assert!("whatever".parse::<MethodSelection>().is_err());
        assert_eq!(MethodSelection::Adjusted.to_string(), "adjusted");
    }

    #[test]
    fn test_too_few_samples_for_every_method() {
        let samples = vec![Sample::new(100.0, 1.0), Sample::new(200.0, 5.0)];
        for method in ThresholdMethod::ALL {
            assert_eq!(calculate_thresholds(&samples, method), Thresholds::none());
        }
    }

    #[test]
    fn test_malformed_samples_are_filtered() {
        let mut samples = reference_series();
        samples.truncate(2);
        samples.push(Sample::new(-10.0, 2.0));
        samples.push(Sample::new(220.0, f64::NAN));
        // Only two valid samples remain
        assert_eq!(
            calculate_thresholds(&samples, ThresholdMethod::Dickhuth),
            Thresholds::none()
        );
    }

    #[test]
    fn test_detect_named_unknown_method() {
        let detector = ThresholdDetector::new();
        let result = detector.detect_named(&reference_series(), "magic");
        assert!(matches!(result, Err(LactrsError::UnknownMethod { .. })));

        let result = detector.detect_named(&reference_series(), "dickhuth").unwrap();
        assert!(result.lt2.is_some());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let samples = reference_series();
        for method in ThresholdMethod::ALL {
            let first = calculate_thresholds(&samples, method);
            let second = calculate_thresholds(&samples, method);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_samples_sorted_by_load() {
        let mut samples = reference_series();
        samples.reverse();
        assert_eq!(
            calculate_thresholds(&samples, ThresholdMethod::Dickhuth),
            calculate_thresholds(&reference_series(), ThresholdMethod::Dickhuth)
        );
    }

    #[test]
    fn test_heart_rate_interpolation() {
        let samples: Vec<Sample> = reference_series()
            .into_iter()
            .zip([120u16, 130, 140, 150, 160, 170])
            .map(|(s, hr)| s.with_heart_rate(hr))
            .collect();

        let thresholds = calculate_thresholds(&samples, ThresholdMethod::Dickhuth);
        let lt2 = thresholds.lt2.unwrap();
        let hr = lt2.heart_rate.unwrap();
        assert!(hr > 150.0 && hr < 160.0);
    }
}
