//! Fixed-concentration methods (Dickhuth, Mader)
//!
//! Both search for the first upward crossing of a lactate concentration,
//! starting from the baseline (lowest lactate) sample so that an elevated
//! warm-up value cannot produce a crossing.

use super::{baseline_index, crossing, ThresholdConstants};
use crate::models::{Sample, Thresholds};

/// LT1 at baseline + delta, LT2 at a fixed concentration
pub(super) fn dickhuth(samples: &[Sample], constants: &ThresholdConstants) -> Thresholds {
    let base = baseline_index(samples);
    let lt1_target = samples[base].lactate + constants.lt1_baseline_delta;

    Thresholds {
        lt1: crossing(samples, lt1_target, base),
        lt2: crossing(samples, constants.dickhuth_lt2_lactate, base),
    }
}

/// LT1 and LT2 at fixed concentrations (OBLA)
pub(super) fn mader(samples: &[Sample], constants: &ThresholdConstants) -> Thresholds {
    let base = baseline_index(samples);

    Thresholds {
        lt1: crossing(samples, constants.mader_lt1_lactate, base),
        lt2: crossing(samples, constants.mader_lt2_lactate, base),
    }
}
