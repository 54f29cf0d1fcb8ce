//! Per-stage ingestion from devices and webhooks
//!
//! A stage arriving for a test either amends an existing row (same stage
//! number) or appends a new one. Cut-short stages get their theoretical load
//! before the row is stored. The two stages after it use it as a reference, so
//! their corrections are recomputed whenever it changes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{CalculationError, Result, StorageError};
use crate::interpolation::Interpolator;
use crate::models::{StageRow, TheoreticalLoadResult};
use crate::store::StageStore;

/// Raw stage sample as delivered by a device or webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingStage {
    pub stage: u32,
    pub load: f64,
    #[serde(default)]
    pub lactate: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<u16>,
    #[serde(default)]
    pub duration_min: Option<f64>,
}

impl IncomingStage {
    pub fn new(stage: u32, load: f64) -> Self {
        IncomingStage {
            stage,
            load,
            lactate: None,
            heart_rate: None,
            duration_min: None,
        }
    }

    pub fn with_lactate(mut self, lactate: f64) -> Self {
        self.lactate = Some(lactate);
        self
    }

    pub fn with_duration(mut self, duration_min: f64) -> Self {
        self.duration_min = Some(duration_min);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub stage: u32,
    pub action: IngestAction,
    /// Present when the stage was cut short and its load extrapolated
    pub correction: Option<TheoreticalLoadResult>,
    /// Later stages whose correction changed because of this stage
    pub recorrected: Vec<u32>,
}

/// Stores incoming stages, correcting incomplete ones
#[derive(Debug, Clone, Default)]
pub struct StageIngestor {
    interpolator: Interpolator,
}

impl StageIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpolator(interpolator: Interpolator) -> Self {
        StageIngestor { interpolator }
    }

    #[instrument(skip(self, store, incoming), fields(stage = incoming.stage))]
    pub fn ingest<S: StageStore + ?Sized>(
        &self,
        store: &mut S,
        test_id: &str,
        incoming: IncomingStage,
    ) -> Result<IngestOutcome> {
        if incoming.stage == 0 {
            return Err(CalculationError::invalid("stage ingestion", "stage", 0).into());
        }
        if !incoming.load.is_finite() || incoming.load < 0.0 {
            return Err(CalculationError::invalid("stage ingestion", "load", incoming.load).into());
        }

        let protocol = store.protocol(test_id)?;
        if protocol.closed {
            return Err(StorageError::TestClosed {
                test_id: test_id.to_string(),
                stage: incoming.stage,
            }
            .into());
        }

        let mut row = StageRow {
            stage: incoming.stage,
            load: Some(incoming.load),
            lactate: incoming.lactate,
            heart_rate: incoming.heart_rate,
            duration_min: incoming.duration_min,
            is_final_approximation: false,
            theoretical_load: None,
        };

        // Correct against the series as it will look once the row is stored
        let mut series = store.load_series(test_id)?;
        series.insert_or_replace(row.clone());
        let index = series
            .stages
            .iter()
            .position(|r| r.stage == row.stage)
            .ok_or_else(|| CalculationError::invalid("stage ingestion", "stage", row.stage))?;
        let correction = self
            .interpolator
            .interpolate_incomplete_stage(&series.stages, index, protocol.stage_duration_min)?;

        if let Some(result) = correction.result {
            row.theoretical_load = Some(result.theoretical_load);
            row.is_final_approximation = result.is_final_approximation;
        }

        series.insert_or_replace(row.clone());
        let action = if store.upsert_stage(test_id, row)? {
            IngestAction::Updated
        } else {
            IngestAction::Inserted
        };

        let recorrected = self.refresh_followers(store, test_id, &series.stages, index, protocol.stage_duration_min)?;

        info!(
            test_id,
            action = ?action,
            corrected = correction.corrected,
            load = correction.load,
            "Stage ingested"
        );

        Ok(IngestOutcome {
            stage: incoming.stage,
            action,
            correction: correction.result,
            recorrected,
        })
    }

    /// Recompute the corrections of the two stages that reference `index`
    fn refresh_followers<S: StageStore + ?Sized>(
        &self,
        store: &mut S,
        test_id: &str,
        stages: &[StageRow],
        index: usize,
        target_min: f64,
    ) -> Result<Vec<u32>> {
        let mut recorrected = Vec::new();
        for follower in (index + 1)..stages.len().min(index + 3) {
            let current = &stages[follower];
            if current.load.is_none() {
                continue;
            }
            let correction = self
                .interpolator
                .interpolate_incomplete_stage(stages, follower, target_min)?;

            let mut updated = current.clone();
            match correction.result {
                Some(result) => {
                    updated.theoretical_load = Some(result.theoretical_load);
                    updated.is_final_approximation = result.is_final_approximation;
                }
                None => {
                    updated.theoretical_load = None;
                    updated.is_final_approximation = false;
                }
            }

            if updated != *current {
                debug!(
                    test_id,
                    stage = updated.stage,
                    theoretical_load = ?updated.theoretical_load,
                    "Reference stage changed, correction refreshed"
                );
                recorrected.push(updated.stage);
                store.upsert_stage(test_id, updated)?;
            }
        }
        Ok(recorrected)
    }
}
