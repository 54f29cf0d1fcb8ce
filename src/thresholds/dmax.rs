//! Curve-fit methods (Dmax, modified Dmax)
//!
//! A least-squares polynomial (cubic, or lower when there are fewer than
//! four samples) is fitted to lactate over load. LT2 is the point of the curve
//! farthest below the chord between two samples; since the perpendicular
//! distance to a fixed chord is proportional to the vertical gap, the maximum
//! sits where the curve slope equals the chord slope. LT1 is where the curve
//! first rises `lt1_baseline_delta` above its minimum, before LT2.

use tracing::debug;

use super::polynomial::Polynomial;
use super::{point_at, ThresholdConstants};
use crate::models::{Sample, ThresholdPoint, Thresholds};

const MAX_DEGREE: usize = 3;
// mmol/L
const GAP_EPSILON: f64 = 1e-9;

fn fit(samples: &[Sample]) -> Option<Polynomial> {
    let xs: Vec<f64> = samples.iter().map(|s| s.load).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.lactate).collect();
    let degree = MAX_DEGREE.min(samples.len().saturating_sub(1));
    let poly = Polynomial::fit(&xs, &ys, degree);
    if poly.is_none() {
        debug!(samples = samples.len(), degree, "Lactate curve fit is singular");
    }
    poly
}

/// Classic Dmax: chord from the first to the last sample
pub(super) fn dmax(samples: &[Sample], constants: &ThresholdConstants) -> Thresholds {
    let Some(poly) = fit(samples) else {
        return Thresholds::none();
    };
    let (first, last) = (&samples[0], &samples[samples.len() - 1]);

    let lt2 = farthest_below_chord(&poly, samples, first, last);
    let lt1 = curve_lt1(&poly, samples, lt2.as_ref(), constants);
    Thresholds { lt1, lt2 }
}

/// Modified Dmax: chord from the sample preceding the first marked lactate rise
pub(super) fn modified_dmax(samples: &[Sample], constants: &ThresholdConstants) -> Thresholds {
    let Some(poly) = fit(samples) else {
        return Thresholds::none();
    };
    let last = &samples[samples.len() - 1];

    let start = samples
        .windows(2)
        .find(|pair| pair[1].lactate - pair[0].lactate > constants.modified_dmax_rise)
        .map(|pair| &pair[0]);

    let lt2 = match start {
        Some(start) => farthest_below_chord(&poly, samples, start, last),
        None => {
            debug!(
                rise = constants.modified_dmax_rise,
                "No lactate rise large enough to anchor the modified Dmax chord"
            );
            None
        }
    };
    let lt1 = curve_lt1(&poly, samples, lt2.as_ref(), constants);
    Thresholds { lt1, lt2 }
}

fn farthest_below_chord(
    poly: &Polynomial,
    samples: &[Sample],
    start: &Sample,
    end: &Sample,
) -> Option<ThresholdPoint> {
    if end.load <= start.load {
        return None;
    }
    let slope = (end.lactate - start.lactate) / (end.load - start.load);
    let gap = |x: f64| start.lactate + slope * (x - start.load) - poly.eval(x);

    poly.points_with_slope(slope, start.load, end.load)
        .into_iter()
        .map(|x| (x, gap(x)))
        .filter(|&(_, g)| g > GAP_EPSILON)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(x, _)| point_at(samples, x, poly.eval(x)))
}

fn curve_lt1(
    poly: &Polynomial,
    samples: &[Sample],
    lt2: Option<&ThresholdPoint>,
    constants: &ThresholdConstants,
) -> Option<ThresholdPoint> {
    let lo = samples[0].load;
    let hi = lt2.map_or(samples[samples.len() - 1].load, |p| p.load);
    if hi <= lo {
        return None;
    }

    let (x_min, y_min) = poly.minimum(lo, hi);
    let x = poly.first_crossing(y_min + constants.lt1_baseline_delta, x_min, hi)?;
    if lt2.is_some() && x >= hi {
        return None;
    }
    Some(point_at(samples, x, poly.eval(x)))
}
