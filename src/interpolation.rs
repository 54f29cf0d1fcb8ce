//! Incomplete-stage correction
//!
//! When an athlete stops before the end of a stage, the load held for the
//! partial duration underestimates the load sustainable for a full stage.
//! The step from the previous stage is scaled by `target / actual` and added
//! to the previous load. With one reference stage the step is the observed
//! increment. With two, a quadratic is fitted to the loads at stage positions
//! -1, 0 and 1 and the step is its slope at the cut-short stage, never less
//! than the observed increment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CalculationError, Result};
use crate::models::{StageRow, TheoreticalLoadResult};

/// Shortfall in minutes (5 seconds) below which a stage still counts as complete
pub const INCOMPLETE_STAGE_TOLERANCE_MIN: f64 = 5.0 / 60.0;

/// Stage correction inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TheoreticalLoadInput {
    /// Load of the stage before the previous one, enables quadratic mode
    pub pre_previous: Option<f64>,
    /// Load of the last completed stage
    pub previous: f64,
    /// Raw load of the cut-short stage
    pub current: f64,
    /// Minutes actually held
    pub actual_duration_min: f64,
    /// Protocol stage duration in minutes
    pub target_duration_min: f64,
}

/// Outcome of correcting one stage of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageCorrection {
    /// Load to use for the stage
    pub load: f64,
    /// False when no correction applied (complete stage, first stage, or no reference stage)
    pub corrected: bool,
    pub result: Option<TheoreticalLoadResult>,
}

impl StageCorrection {
    fn raw(load: f64) -> Self {
        StageCorrection {
            load,
            corrected: false,
            result: None,
        }
    }
}

/// Stage duration checks with a configurable tolerance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolator {
    tolerance_min: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Interpolator {
            tolerance_min: INCOMPLETE_STAGE_TOLERANCE_MIN,
        }
    }
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(tolerance_min: f64) -> Self {
        Interpolator {
            tolerance_min: tolerance_min.max(0.0),
        }
    }

    pub fn tolerance_min(&self) -> f64 {
        self.tolerance_min
    }

    /// True when `actual` falls short of `target` by more than the tolerance
    pub fn is_incomplete(&self, actual_min: f64, target_min: f64) -> bool {
        actual_min.is_finite()
            && target_min.is_finite()
            && target_min > 0.0
            && actual_min > 0.0
            && actual_min < target_min - self.tolerance_min
    }

    /// Incomplete stage that has a previous stage to extrapolate from
    pub fn applies_to(&self, stage_number: u32, actual_min: f64, target_min: f64) -> bool {
        stage_number > 1 && self.is_incomplete(actual_min, target_min)
    }

    /// Correct the stage at `index` of `stages` using the stages before it
    pub fn interpolate_incomplete_stage(
        &self,
        stages: &[StageRow],
        index: usize,
        target_min: f64,
    ) -> Result<StageCorrection> {
        let current_row = stages.get(index).ok_or_else(|| {
            CalculationError::invalid("stage interpolation", "index", index)
        })?;
        let current = current_row.load.ok_or_else(|| {
            CalculationError::invalid("stage interpolation", "load", "missing")
        })?;

        let actual = match current_row.duration_min {
            Some(actual) if self.applies_to(current_row.stage, actual, target_min) => actual,
            _ => return Ok(StageCorrection::raw(current)),
        };

        let previous = match index.checked_sub(1).and_then(|i| stages.get(i)).and_then(|r| r.load) {
            Some(load) => load,
            None => {
                debug!(stage = current_row.stage, "No previous stage load, keeping raw load");
                return Ok(StageCorrection::raw(current));
            }
        };
        let pre_previous = index
            .checked_sub(2)
            .and_then(|i| stages.get(i))
            .and_then(|r| r.load);

        let result = calculate_theoretical_load(&TheoreticalLoadInput {
            pre_previous,
            previous,
            current,
            actual_duration_min: actual,
            target_duration_min: target_min,
        })?;

        Ok(StageCorrection {
            load: result.theoretical_load,
            corrected: true,
            result: Some(result),
        })
    }
}

/// True when `actual` is materially shorter than `target` (default tolerance)
pub fn needs_theoretical_load(actual_duration_min: f64, target_duration_min: f64) -> bool {
    Interpolator::default().is_incomplete(actual_duration_min, target_duration_min)
}

/// Extrapolate the load sustainable for the full target duration
pub fn calculate_theoretical_load(input: &TheoreticalLoadInput) -> Result<TheoreticalLoadResult> {
    let ratio = input.actual_duration_min / input.target_duration_min;
    if !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0 {
        return Err(CalculationError::invalid(
            "theoretical load",
            "actual/target duration",
            format!("{}/{}", input.actual_duration_min, input.target_duration_min),
        )
        .into());
    }
    for (name, value) in [("previous", Some(input.previous)), ("current", Some(input.current)), ("pre_previous", input.pre_previous)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(CalculationError::invalid("theoretical load", name, v).into());
            }
        }
    }

    let increment = input.current - input.previous;
    let step = match input.pre_previous {
        Some(pre_previous) => progression_slope(pre_previous, input.previous, input.current).max(increment),
        None => increment,
    };
    let extrapolated = input.previous + step / ratio;

    // Never below the load actually held
    let theoretical_load = extrapolated.max(input.current);

    debug!(
        previous = input.previous,
        current = input.current,
        ratio,
        quadratic = input.pre_previous.is_some(),
        theoretical_load,
        "Theoretical load calculated"
    );

    Ok(TheoreticalLoadResult {
        theoretical_load,
        is_final_approximation: true,
    })
}

/// Slope at t = 1 of the quadratic through (-1, a), (0, b), (1, c)
fn progression_slope(a: f64, b: f64, c: f64) -> f64 {
    (a - 4.0 * b + 3.0 * c) / 2.0
}
