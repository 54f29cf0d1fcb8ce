// Library interface for lactrs modules
// The binary and the integration tests use the same public API

pub mod config;
pub mod database;
pub mod error;
pub mod evaluation;
pub mod ingest;
pub mod input;
pub mod interpolation;
pub mod logging;
pub mod models;
pub mod report;
pub mod store;
pub mod thresholds;
pub mod trend;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::AppConfig;
pub use database::Database;
pub use error::{CalculationError, InputError, LactrsError, Result, StorageError};
pub use evaluation::{Evaluation, TestEvaluator};
pub use ingest::{IncomingStage, IngestAction, IngestOutcome, StageIngestor};
pub use interpolation::{
    calculate_theoretical_load, needs_theoretical_load, Interpolator, StageCorrection, TheoreticalLoadInput,
};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use store::{LactateStore, MemoryStore, StageStore, StoredZones, TestRepository, ThresholdStore, ZoneKey, ZoneStore};
pub use thresholds::{calculate_thresholds, MethodSelection, ThresholdConstants, ThresholdDetector, ThresholdMethod};
pub use trend::{build_trend, TrendAggregator};
pub use zones::{calculate_training_zones, ZoneCalculator};
