use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::error::{CalculationError, Result};
use crate::models::{ThresholdPoint, TrainingZone, ZoneModel};

/// Upper bound of 5-zone recovery as a fraction of LT1
pub const FIVE_ZONE_RECOVERY_FRACTION: Decimal = dec!(0.80);

/// Upper bound of the 5-zone threshold band as a fraction of LT2,
/// capped at the midpoint between LT2 and max load
pub const FIVE_ZONE_THRESHOLD_FRACTION: Decimal = dec!(1.05);

/// Share of the LT1-LT2 span added to the low and high zones of the polarized model
pub const POLARIZED_MIDDLE_OFFSET: Decimal = dec!(0.25);

/// Fallback boundaries as fractions of max load when no threshold is usable
pub const FALLBACK_LOW_FRACTION: Decimal = dec!(0.55);
pub const FALLBACK_HIGH_FRACTION: Decimal = dec!(0.75);

struct ZoneSpec {
    name: &'static str,
    description: &'static str,
}

const FIVE_ZONES: [ZoneSpec; 5] = [
    ZoneSpec {
        name: "Recovery",
        description: "Regeneration, well below LT1",
    },
    ZoneSpec {
        name: "Aerobic Endurance",
        description: "Basic endurance up to LT1",
    },
    ZoneSpec {
        name: "Tempo",
        description: "Between LT1 and LT2",
    },
    ZoneSpec {
        name: "Threshold",
        description: "Just above LT2",
    },
    ZoneSpec {
        name: "High Intensity",
        description: "Above threshold up to max load",
    },
];

const THREE_ZONES_A: [ZoneSpec; 3] = [
    ZoneSpec {
        name: "Low Intensity",
        description: "Up to LT1",
    },
    ZoneSpec {
        name: "Moderate Intensity",
        description: "Between LT1 and LT2",
    },
    ZoneSpec {
        name: "High Intensity",
        description: "Above LT2",
    },
];

const THREE_ZONES_B: [ZoneSpec; 3] = [
    ZoneSpec {
        name: "Low Intensity",
        description: "Polarized low band, up to the first quarter of LT1-LT2",
    },
    ZoneSpec {
        name: "Threshold Band",
        description: "Narrow middle band between LT1 and LT2",
    },
    ZoneSpec {
        name: "High Intensity",
        description: "Polarized high band, from the last quarter of LT1-LT2",
    },
];

const PERCENT_OF_MAX: [ZoneSpec; 3] = [
    ZoneSpec {
        name: "Low Intensity",
        description: "Up to 55% of max load (no thresholds available)",
    },
    ZoneSpec {
        name: "Moderate Intensity",
        description: "55-75% of max load (no thresholds available)",
    },
    ZoneSpec {
        name: "High Intensity",
        description: "Above 75% of max load (no thresholds available)",
    },
];

const SPLIT_AT_LT1: [ZoneSpec; 2] = [
    ZoneSpec {
        name: "Below LT1",
        description: "Up to LT1 (LT2 unavailable)",
    },
    ZoneSpec {
        name: "Above LT1",
        description: "Above LT1 (LT2 unavailable)",
    },
];

const SPLIT_AT_LT2: [ZoneSpec; 2] = [
    ZoneSpec {
        name: "Below LT2",
        description: "Up to LT2 (LT1 unavailable)",
    },
    ZoneSpec {
        name: "Above LT2",
        description: "Above LT2 (LT1 unavailable)",
    },
];

/// Training zone calculation from lactate thresholds
pub struct ZoneCalculator;

impl ZoneCalculator {
    /// Partition `[0, max_load]` into zones anchored on LT1/LT2
    ///
    /// Boundaries per model:
    /// - 5-zones: 80% LT1, LT1, LT2, min(105% LT2, midpoint LT2..max), max
    /// - 3-zones-a: LT1, LT2, max
    /// - 3-zones-b: LT1 + 25% span, LT2 - 25% span, max
    ///
    /// A threshold at or below zero, at or above `max_load`, or an LT1 not below
    /// LT2 is discarded. With one usable threshold the axis is split at it; with
    /// none, zones fall back to 55% / 75% of max load.
    pub fn calculate_training_zones(
        lt1: Option<ThresholdPoint>,
        lt2: Option<ThresholdPoint>,
        max_load: f64,
        model: ZoneModel,
    ) -> Result<Vec<TrainingZone>> {
        if !max_load.is_finite() || max_load <= 0.0 {
            return Err(CalculationError::invalid("training zones", "max_load", max_load).into());
        }
        let max = to_decimal(max_load, "max_load")?;

        let mut lt1 = Self::usable_anchor(lt1, max_load, "LT1")?;
        let lt2 = Self::usable_anchor(lt2, max_load, "LT2")?;
        if let (Some(a), Some(b)) = (lt1, lt2) {
            if a >= b {
                warn!(lt1 = %a, lt2 = %b, "LT1 not below LT2, discarding LT1");
                lt1 = None;
            }
        }

        let (bounds, specs): (Vec<Decimal>, &[ZoneSpec]) = match (lt1, lt2) {
            (Some(lt1), Some(lt2)) => match model {
                ZoneModel::FiveZones => {
                    let threshold_top = (lt2 * FIVE_ZONE_THRESHOLD_FRACTION).min((lt2 + max) / dec!(2));
                    (
                        vec![lt1 * FIVE_ZONE_RECOVERY_FRACTION, lt1, lt2, threshold_top, max],
                        &FIVE_ZONES,
                    )
                }
                ZoneModel::ThreeZonesA => (vec![lt1, lt2, max], &THREE_ZONES_A),
                ZoneModel::ThreeZonesB => {
                    let offset = (lt2 - lt1) * POLARIZED_MIDDLE_OFFSET;
                    (vec![lt1 + offset, lt2 - offset, max], &THREE_ZONES_B)
                }
            },
            (Some(lt1), None) => {
                debug!(model = %model, "LT2 unavailable, splitting zones at LT1");
                (vec![lt1, max], &SPLIT_AT_LT1)
            }
            (None, Some(lt2)) => {
                debug!(model = %model, "LT1 unavailable, splitting zones at LT2");
                (vec![lt2, max], &SPLIT_AT_LT2)
            }
            (None, None) => {
                debug!(model = %model, "No thresholds, using percent-of-max zones");
                (
                    vec![max * FALLBACK_LOW_FRACTION, max * FALLBACK_HIGH_FRACTION, max],
                    &PERCENT_OF_MAX,
                )
            }
        };

        Self::build(&bounds, specs)
    }

    /// Determine which zone a load falls into; loads above the last zone map to it
    pub fn zone_for_load(load: f64, zones: &[TrainingZone]) -> Option<u8> {
        if !load.is_finite() || load < 0.0 {
            return None;
        }
        let load = Decimal::from_f64(load)?;
        zones
            .iter()
            .find(|zone| load <= zone.max)
            .or_else(|| zones.last())
            .map(|zone| zone.number)
    }

    /// Upper bounds of the zones as plain numbers
    pub fn boundaries(zones: &[TrainingZone]) -> Vec<f64> {
        zones.iter().filter_map(|zone| zone.max.to_f64()).collect()
    }

    fn usable_anchor(point: Option<ThresholdPoint>, max_load: f64, label: &str) -> Result<Option<Decimal>> {
        match point {
            Some(p) if p.load.is_finite() && p.load > 0.0 && p.load < max_load => {
                Ok(Some(to_decimal(p.load, label)?))
            }
            Some(p) => {
                warn!(threshold = label, load = p.load, max_load, "Threshold outside zone range, ignoring");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn build(bounds: &[Decimal], specs: &[ZoneSpec]) -> Result<Vec<TrainingZone>> {
        let mut zones = Vec::with_capacity(bounds.len());
        let mut lower = Decimal::ZERO;
        for (i, (&upper, spec)) in bounds.iter().zip(specs).enumerate() {
            if upper <= lower {
                return Err(CalculationError::invalid(
                    "training zones",
                    &format!("zone {} upper bound", i + 1),
                    upper,
                )
                .into());
            }
            zones.push(TrainingZone {
                number: (i + 1) as u8,
                name: spec.name.to_string(),
                min: lower.normalize(),
                max: upper.normalize(),
                description: Some(spec.description.to_string()),
            });
            lower = upper;
        }
        Ok(zones)
    }
}

/// Partition the load axis into training zones
pub fn calculate_training_zones(
    lt1: Option<ThresholdPoint>,
    lt2: Option<ThresholdPoint>,
    max_load: f64,
    model: ZoneModel,
) -> Result<Vec<TrainingZone>> {
    ZoneCalculator::calculate_training_zones(lt1, lt2, max_load, model)
}

fn to_decimal(value: f64, label: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| CalculationError::invalid("training zones", label, value).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(load: f64) -> Option<ThresholdPoint> {
        Some(ThresholdPoint::new(load, 2.0))
    }

    fn uppers(zones: &[TrainingZone]) -> Vec<Decimal> {
        zones.iter().map(|z| z.max).collect()
    }

    #[test]
    fn test_five_zones() {
        let zones = calculate_training_zones(point(200.0), point(300.0), 400.0, ZoneModel::FiveZones).unwrap();

        assert_eq!(zones.len(), 5);
        assert_eq!(uppers(&zones), vec![dec!(160), dec!(200), dec!(300), dec!(315), dec!(400)]);
        assert_eq!(zones[0].min, Decimal::ZERO);
        assert_eq!(zones[2].name, "Tempo");
        assert_eq!(zones[3].min, dec!(300));
    }

    #[test]
    fn test_five_zones_threshold_band_capped() {
        // 105% of LT2 would exceed the LT2..max midpoint
        let zones = calculate_training_zones(point(200.0), point(380.0), 390.0, ZoneModel::FiveZones).unwrap();
        assert_eq!(zones[3].max, dec!(385));
        assert_eq!(zones[4].max, dec!(390));
    }

    #[test]
    fn test_three_zones_a() {
        let zones = calculate_training_zones(point(200.0), point(300.0), 400.0, ZoneModel::ThreeZonesA).unwrap();
        assert_eq!(uppers(&zones), vec![dec!(200), dec!(300), dec!(400)]);
        assert_eq!(zones[1].min, dec!(200));
    }

    #[test]
    fn test_three_zones_b_polarized() {
        let zones = calculate_training_zones(point(200.0), point(300.0), 400.0, ZoneModel::ThreeZonesB).unwrap();
        assert_eq!(uppers(&zones), vec![dec!(225), dec!(275), dec!(400)]);
        assert_eq!(zones[1].name, "Threshold Band");
    }

    #[test]
    fn test_fallback_without_thresholds() {
        let zones = calculate_training_zones(None, None, 400.0, ZoneModel::FiveZones).unwrap();
        assert_eq!(uppers(&zones), vec![dec!(220), dec!(300), dec!(400)]);
    }

    #[test]
    fn test_fallback_with_single_threshold() {
        let zones = calculate_training_zones(None, point(300.0), 400.0, ZoneModel::FiveZones).unwrap();
        assert_eq!(uppers(&zones), vec![dec!(300), dec!(400)]);
        assert_eq!(zones[0].name, "Below LT2");

        // LT1 above LT2 is discarded
        let zones = calculate_training_zones(point(320.0), point(300.0), 400.0, ZoneModel::ThreeZonesA).unwrap();
        assert_eq!(zones.len(), 2);

        // LT2 beyond max load is discarded
        let zones = calculate_training_zones(point(200.0), point(450.0), 400.0, ZoneModel::ThreeZonesA).unwrap();
        assert_eq!(uppers(&zones), vec![dec!(200), dec!(400)]);
        assert_eq!(zones[1].name, "Above LT1");
    }

    #[test]
    fn test_invalid_max_load() {
        assert!(calculate_training_zones(point(200.0), point(300.0), 0.0, ZoneModel::FiveZones).is_err());
        assert!(calculate_training_zones(None, None, f64::NAN, ZoneModel::FiveZones).is_err());
    }

    #[test]
    fn test_boundaries_strictly_increasing() {
        for model in [ZoneModel::FiveZones, ZoneModel::ThreeZonesA, ZoneModel::ThreeZonesB] {
            let zones = calculate_training_zones(point(170.0), point(284.375), 350.0, model).unwrap();
            let bounds = ZoneCalculator::boundaries(&zones);
            assert!(bounds.windows(2).all(|w| w[0] < w[1]), "{:?}", bounds);
            assert_eq!(*bounds.last().unwrap(), 350.0);
            for pair in zones.windows(2) {
                assert_eq!(pair[0].max, pair[1].min);
            }
        }
    }

    #[test]
    fn test_zone_for_load() {
        let zones = calculate_training_zones(point(200.0), point(300.0), 400.0, ZoneModel::FiveZones).unwrap();

        assert_eq!(ZoneCalculator::zone_for_load(100.0, &zones), Some(1));
        assert_eq!(ZoneCalculator::zone_for_load(160.0, &zones), Some(1));
        assert_eq!(ZoneCalculator::zone_for_load(180.0, &zones), Some(2));
        assert_eq!(ZoneCalculator::zone_for_load(250.0, &zones), Some(3));
        assert_eq!(ZoneCalculator::zone_for_load(310.0, &zones), Some(4));
        assert_eq!(ZoneCalculator::zone_for_load(390.0, &zones), Some(5));
        assert_eq!(ZoneCalculator::zone_for_load(450.0, &zones), Some(5));
        assert_eq!(ZoneCalculator::zone_for_load(-1.0, &zones), None);
    }
}
