//! Storage boundary for stages, thresholds and zones
//!
//! The engine never owns persistent state. Callers pass a store explicitly,
//! either the in-memory [`MemoryStore`] (one per request or test run) or the
//! SQLite-backed [`crate::database::Database`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{LactateTest, StageRow, StageSeries, TestProtocol, Thresholds, TrainingZone, ZoneModel};
use crate::thresholds::MethodSelection;

/// Stage rows and protocol constants per test
pub trait StageStore {
    /// Stage rows of a test in stage order
    fn load_series(&self, test_id: &str) -> Result<StageSeries>;

    /// Protocol constants of a test
    fn protocol(&self, test_id: &str) -> Result<TestProtocol>;

    /// Replace the row with the same stage number or append it.
    /// Returns true when an existing row was replaced.
    fn upsert_stage(&mut self, test_id: &str, row: StageRow) -> Result<bool>;
}

/// Computed or reviewer-adjusted thresholds per test
pub trait ThresholdStore {
    fn save_thresholds(&mut self, test_id: &str, selection: MethodSelection, thresholds: &Thresholds) -> Result<()>;

    fn load_thresholds(&self, test_id: &str, selection: MethodSelection) -> Result<Option<Thresholds>>;
}

/// Training zones per (customer, test, method)
pub trait ZoneStore {
    fn save_zones(&mut self, key: &ZoneKey, zones: &StoredZones) -> Result<()>;

    fn load_zones(&self, key: &ZoneKey) -> Result<Option<StoredZones>>;
}

/// Historical tests per customer
pub trait TestRepository {
    /// All tests of a customer with their stages, in no particular order
    fn tests_for_customer(&self, customer_id: &str) -> Result<Vec<LactateTest>>;
}

/// A store covering every boundary the engine talks to
pub trait LactateStore: StageStore + ThresholdStore + ZoneStore + TestRepository {}

impl<T: StageStore + ThresholdStore + ZoneStore + TestRepository> LactateStore for T {}

/// Lookup key for stored zones
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneKey {
    pub customer_id: String,
    pub test_id: String,
    /// Method tag, including `adjusted`
    pub method: String,
}

impl ZoneKey {
    pub fn new(customer_id: &str, test_id: &str, selection: MethodSelection) -> Self {
        ZoneKey {
            customer_id: customer_id.to_string(),
            test_id: test_id.to_string(),
            method: selection.tag().to_string(),
        }
    }
}

/// Zones as persisted, with the model that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredZones {
    pub model: ZoneModel,
    pub zones: Vec<TrainingZone>,
}

/// In-memory store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tests: HashMap<String, LactateTest>,
    thresholds: HashMap<(String, String), Thresholds>,
    zones: HashMap<ZoneKey, StoredZones>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new open test and return its id
    pub fn create_test(&mut self, customer_id: &str, protocol: TestProtocol, created_at: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert_test(LactateTest {
            id: id.clone(),
            customer_id: customer_id.to_string(),
            created_at,
            protocol,
            stages: Vec::new(),
        });
        id
    }

    /// Insert or replace a complete test
    pub fn insert_test(&mut self, mut test: LactateTest) {
        test.stages = StageSeries::new(test.id.clone(), test.stages).stages;
        self.tests.insert(test.id.clone(), test);
    }

    /// Mark a test closed; later stage amendments are refused
    pub fn close_test(&mut self, test_id: &str) -> Result<()> {
        self.test_mut(test_id)?.protocol.closed = true;
        Ok(())
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    fn test(&self, test_id: &str) -> Result<&LactateTest> {
        self.tests.get(test_id).ok_or_else(|| not_found("lactate_tests", test_id))
    }

    fn test_mut(&mut self, test_id: &str) -> Result<&mut LactateTest> {
        self.tests
            .get_mut(test_id)
            .ok_or_else(|| not_found("lactate_tests", test_id))
    }
}

impl StageStore for MemoryStore {
    fn load_series(&self, test_id: &str) -> Result<StageSeries> {
        Ok(self.test(test_id)?.series())
    }

    fn protocol(&self, test_id: &str) -> Result<TestProtocol> {
        Ok(self.test(test_id)?.protocol.clone())
    }

    fn upsert_stage(&mut self, test_id: &str, row: StageRow) -> Result<bool> {
        let test = self.test_mut(test_id)?;
        if test.protocol.closed {
            return Err(StorageError::TestClosed {
                test_id: test_id.to_string(),
                stage: row.stage,
            }
            .into());
        }
        let mut series = StageSeries::new(test_id, std::mem::take(&mut test.stages));
        let replaced = series.insert_or_replace(row);
        test.stages = series.stages;
        Ok(replaced)
    }
}

impl ThresholdStore for MemoryStore {
    fn save_thresholds(&mut self, test_id: &str, selection: MethodSelection, thresholds: &Thresholds) -> Result<()> {
        self.thresholds
            .insert((test_id.to_string(), selection.tag().to_string()), *thresholds);
        Ok(())
    }

    fn load_thresholds(&self, test_id: &str, selection: MethodSelection) -> Result<Option<Thresholds>> {
        Ok(self
            .thresholds
            .get(&(test_id.to_string(), selection.tag().to_string()))
            .copied())
    }
}

impl ZoneStore for MemoryStore {
    fn save_zones(&mut self, key: &ZoneKey, zones: &StoredZones) -> Result<()> {
        self.zones.insert(key.clone(), zones.clone());
        Ok(())
    }

    fn load_zones(&self, key: &ZoneKey) -> Result<Option<StoredZones>> {
        Ok(self.zones.get(key).cloned())
    }
}

impl TestRepository for MemoryStore {
    fn tests_for_customer(&self, customer_id: &str) -> Result<Vec<LactateTest>> {
        Ok(self
            .tests
            .values()
            .filter(|test| test.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

pub(crate) fn not_found(table: &str, id: &str) -> crate::error::LactrsError {
    StorageError::NotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
    .into()
}
