//! Full evaluation of one test: thresholds, then zones, both persisted

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{CalculationError, Result};
use crate::models::{ThresholdPoint, Thresholds, TrainingZone, ZoneModel};
use crate::store::{not_found, LactateStore, StageStore, StoredZones, ThresholdStore, ZoneKey, ZoneStore};
use crate::thresholds::{MethodSelection, ThresholdDetector};
use crate::zones::ZoneCalculator;

/// Result of evaluating a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub test_id: String,
    pub method: MethodSelection,
    pub model: ZoneModel,
    pub thresholds: Thresholds,
    /// Highest effective load of the test, the top of the last zone
    pub max_load: f64,
    pub zones: Vec<TrainingZone>,
}

#[derive(Debug, Clone, Default)]
pub struct TestEvaluator {
    detector: ThresholdDetector,
}

impl TestEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(detector: ThresholdDetector) -> Self {
        TestEvaluator { detector }
    }

    /// Resolve thresholds for the selection, derive zones and store both
    #[instrument(skip(self, store), fields(method = %selection, model = %model))]
    pub fn evaluate<S: LactateStore + ?Sized>(
        &self,
        store: &mut S,
        customer_id: &str,
        test_id: &str,
        selection: MethodSelection,
        model: ZoneModel,
    ) -> Result<Evaluation> {
        let series = store.load_series(test_id)?;

        let thresholds = match selection {
            MethodSelection::Computed(method) => {
                let thresholds = self.detector.detect(&series.samples(), method);
                store.save_thresholds(test_id, selection, &thresholds)?;
                thresholds
            }
            MethodSelection::Adjusted => store
                .load_thresholds(test_id, MethodSelection::Adjusted)?
                .ok_or_else(|| not_found("thresholds", test_id))?,
        };

        let max_load = series.max_load().ok_or_else(|| CalculationError::InsufficientData {
            calculation: "training zones".to_string(),
            reason: format!("test {} has no stage with both load and lactate", test_id),
        })?;

        let zones = ZoneCalculator::calculate_training_zones(thresholds.lt1, thresholds.lt2, max_load, model)?;
        store.save_zones(
            &ZoneKey::new(customer_id, test_id, selection),
            &StoredZones {
                model,
                zones: zones.clone(),
            },
        )?;

        info!(test_id, zones = zones.len(), max_load, "Test evaluated");
        Ok(Evaluation {
            test_id: test_id.to_string(),
            method: selection,
            model,
            thresholds,
            max_load,
            zones,
        })
    }

    /// Store reviewer-adjusted thresholds for a test
    #[instrument(skip(self, store, thresholds))]
    pub fn adjust<S: ThresholdStore + ?Sized>(&self, store: &mut S, test_id: &str, thresholds: Thresholds) -> Result<()> {
        for (name, point) in [("lt1", thresholds.lt1), ("lt2", thresholds.lt2)] {
            if let Some(point) = point {
                validate_point(name, &point)?;
            }
        }
        store.save_thresholds(test_id, MethodSelection::Adjusted, &thresholds)
    }
}

fn validate_point(name: &str, point: &ThresholdPoint) -> Result<()> {
    if !point.load.is_finite() || point.load <= 0.0 {
        return Err(CalculationError::invalid("adjusted thresholds", &format!("{}.load", name), point.load).into());
    }
    if !point.lactate.is_finite() || point.lactate < 0.0 {
        return Err(CalculationError::invalid("adjusted thresholds", &format!("{}.lactate", name), point.lactate).into());
    }
    Ok(())
}
