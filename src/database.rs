use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{
    LactateTest, LoadUnit, StageRow, StageSeries, TestProtocol, ThresholdPoint, Thresholds, TrainingZone, ZoneModel,
};
use crate::store::{not_found, StageStore, StoredZones, TestRepository, ThresholdStore, ZoneKey, ZoneStore};
use crate::thresholds::MethodSelection;

const STAGE_COLUMNS: &str = "stage, load, lactate, heart_rate, duration_min, is_final_approximation, theoretical_load";

/// SQLite-backed store for tests, stages, thresholds and zones
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(StorageError::from)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Database that lives only as long as the value
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA foreign_keys=ON;

                CREATE TABLE IF NOT EXISTS lactate_tests (
                    id TEXT PRIMARY KEY,
                    customer_id TEXT NOT NULL,
                    created_at DATETIME NOT NULL,
                    stage_duration_min REAL NOT NULL,
                    unit TEXT NOT NULL,
                    closed BOOLEAN NOT NULL DEFAULT FALSE
                );

                CREATE TABLE IF NOT EXISTS stages (
                    test_id TEXT NOT NULL,
                    stage INTEGER NOT NULL,
                    load REAL,
                    lactate REAL,
                    heart_rate INTEGER,
                    duration_min REAL,
                    is_final_approximation BOOLEAN NOT NULL DEFAULT FALSE,
                    theoretical_load REAL,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,

                    PRIMARY KEY (test_id, stage),
                    FOREIGN KEY (test_id) REFERENCES lactate_tests (id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS thresholds (
                    test_id TEXT NOT NULL,
                    method TEXT NOT NULL,
                    lt1_load REAL,
                    lt1_lactate REAL,
                    lt1_heart_rate REAL,
                    lt2_load REAL,
                    lt2_lactate REAL,
                    lt2_heart_rate REAL,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,

                    PRIMARY KEY (test_id, method)
                );

                CREATE TABLE IF NOT EXISTS training_zones (
                    customer_id TEXT NOT NULL,
                    test_id TEXT NOT NULL,
                    method TEXT NOT NULL,
                    model TEXT NOT NULL,
                    zones_json TEXT NOT NULL,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,

                    PRIMARY KEY (customer_id, test_id, method)
                );

                CREATE INDEX IF NOT EXISTS idx_tests_customer_date ON lactate_tests (customer_id, created_at);
                "#,
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Register a new open test and return its id
    #[instrument(skip(self, protocol))]
    pub fn create_test(&mut self, customer_id: &str, protocol: &TestProtocol, created_at: DateTime<Utc>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                r#"
                INSERT INTO lactate_tests (id, customer_id, created_at, stage_duration_min, unit, closed)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id,
                    customer_id,
                    created_at,
                    protocol.stage_duration_min,
                    protocol.unit.to_string(),
                    protocol.closed,
                ],
            )
            .map_err(StorageError::from)?;
        debug!(test_id = %id, "Created lactate test");
        Ok(id)
    }

    /// Mark a test closed; later stage amendments are refused
    #[instrument(skip(self))]
    pub fn close_test(&mut self, test_id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("UPDATE lactate_tests SET closed = TRUE WHERE id = ?1", params![test_id])
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(not_found("lactate_tests", test_id));
        }
        Ok(())
    }

    fn stages_for(&self, test_id: &str) -> Result<Vec<StageRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM stages WHERE test_id = ?1 ORDER BY stage",
                STAGE_COLUMNS
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![test_id], stage_from_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(rows)
    }

    /// Ids of a customer's tests, oldest first
    fn test_ids_for(&self, customer_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM lactate_tests WHERE customer_id = ?1 ORDER BY created_at")
            .map_err(StorageError::from)?;
        let ids = stmt
            .query_map(params![customer_id], |row| row.get::<_, String>(0))
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(ids)
    }

    fn test_header(&self, test_id: &str) -> Result<(String, DateTime<Utc>, TestProtocol)> {
        let header = self
            .conn
            .query_row(
                "SELECT customer_id, created_at, stage_duration_min, unit, closed FROM lactate_tests WHERE id = ?1",
                params![test_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(StorageError::from)?;

        let (customer_id, created_at, stage_duration_min, unit, closed) =
            header.ok_or_else(|| not_found("lactate_tests", test_id))?;
        let protocol = TestProtocol {
            stage_duration_min,
            unit: parse_unit(&unit)?,
            closed,
        };
        Ok((customer_id, created_at, protocol))
    }
}

fn parse_unit(unit: &str) -> Result<LoadUnit> {
    unit.parse::<LoadUnit>()
        .map_err(|_| StorageError::Serialization(format!("Unknown load unit in database: {}", unit)).into())
}

fn stage_from_row(row: &Row) -> rusqlite::Result<StageRow> {
    Ok(StageRow {
        stage: row.get("stage")?,
        load: row.get("load")?,
        lactate: row.get("lactate")?,
        heart_rate: row.get("heart_rate")?,
        duration_min: row.get("duration_min")?,
        is_final_approximation: row.get("is_final_approximation")?,
        theoretical_load: row.get("theoretical_load")?,
    })
}

fn point_from_columns(load: Option<f64>, lactate: Option<f64>, heart_rate: Option<f64>) -> Option<ThresholdPoint> {
    Some(ThresholdPoint {
        load: load?,
        lactate: lactate?,
        heart_rate,
    })
}

impl StageStore for Database {
    #[instrument(skip(self))]
    fn load_series(&self, test_id: &str) -> Result<StageSeries> {
        // Distinguish an unknown test from one without stages
        self.test_header(test_id)?;
        Ok(StageSeries::new(test_id, self.stages_for(test_id)?))
    }

    fn protocol(&self, test_id: &str) -> Result<TestProtocol> {
        Ok(self.test_header(test_id)?.2)
    }

    #[instrument(skip(self, row), fields(stage = row.stage))]
    fn upsert_stage(&mut self, test_id: &str, row: StageRow) -> Result<bool> {
        let (_, _, protocol) = self.test_header(test_id)?;
        if protocol.closed {
            return Err(StorageError::TestClosed {
                test_id: test_id.to_string(),
                stage: row.stage,
            }
            .into());
        }

        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM stages WHERE test_id = ?1 AND stage = ?2",
                params![test_id, row.stage],
                |r| r.get(0),
            )
            .map_err(StorageError::from)?;

        tx.execute(
            r#"
            INSERT INTO stages (
                test_id, stage, load, lactate, heart_rate, duration_min,
                is_final_approximation, theoretical_load, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CURRENT_TIMESTAMP)
            ON CONFLICT (test_id, stage) DO UPDATE SET
                load = excluded.load,
                lactate = excluded.lactate,
                heart_rate = excluded.heart_rate,
                duration_min = excluded.duration_min,
                is_final_approximation = excluded.is_final_approximation,
                theoretical_load = excluded.theoretical_load,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                test_id,
                row.stage,
                row.load,
                row.lactate,
                row.heart_rate,
                row.duration_min,
                row.is_final_approximation,
                row.theoretical_load,
            ],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;

        Ok(existing > 0)
    }
}

impl ThresholdStore for Database {
    #[instrument(skip(self, thresholds), fields(method = %selection))]
    fn save_thresholds(&mut self, test_id: &str, selection: MethodSelection, thresholds: &Thresholds) -> Result<()> {
        let (lt1, lt2) = (thresholds.lt1.as_ref(), thresholds.lt2.as_ref());
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO thresholds (
                    test_id, method, lt1_load, lt1_lactate, lt1_heart_rate,
                    lt2_load, lt2_lactate, lt2_heart_rate, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CURRENT_TIMESTAMP)
                "#,
                params![
                    test_id,
                    selection.tag(),
                    lt1.map(|p| p.load),
                    lt1.map(|p| p.lactate),
                    lt1.and_then(|p| p.heart_rate),
                    lt2.map(|p| p.load),
                    lt2.map(|p| p.lactate),
                    lt2.and_then(|p| p.heart_rate),
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn load_thresholds(&self, test_id: &str, selection: MethodSelection) -> Result<Option<Thresholds>> {
        let thresholds = self
            .conn
            .query_row(
                r#"
                SELECT lt1_load, lt1_lactate, lt1_heart_rate, lt2_load, lt2_lactate, lt2_heart_rate
                FROM thresholds
                WHERE test_id = ?1 AND method = ?2
                "#,
                params![test_id, selection.tag()],
                |row| {
                    Ok(Thresholds {
                        lt1: point_from_columns(row.get(0)?, row.get(1)?, row.get(2)?),
                        lt2: point_from_columns(row.get(3)?, row.get(4)?, row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(thresholds)
    }
}

impl ZoneStore for Database {
    #[instrument(skip(self, zones), fields(method = %key.method))]
    fn save_zones(&mut self, key: &ZoneKey, zones: &StoredZones) -> Result<()> {
        let json = serde_json::to_string(&zones.zones)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO training_zones (
                    customer_id, test_id, method, model, zones_json, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
                "#,
                params![key.customer_id, key.test_id, key.method, zones.model.tag(), json],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn load_zones(&self, key: &ZoneKey) -> Result<Option<StoredZones>> {
        let stored = self
            .conn
            .query_row(
                r#"
                SELECT model, zones_json FROM training_zones
                WHERE customer_id = ?1 AND test_id = ?2 AND method = ?3
                "#,
                params![key.customer_id, key.test_id, key.method],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(StorageError::from)?;

        match stored {
            Some((model, json)) => {
                let model = model
                    .parse::<ZoneModel>()
                    .map_err(|_| StorageError::Serialization(format!("Unknown zone model in database: {}", model)))?;
                let zones: Vec<TrainingZone> = serde_json::from_str(&json).map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(StoredZones { model, zones }))
            }
            None => Ok(None),
        }
    }
}

impl TestRepository for Database {
    #[instrument(skip(self))]
    fn tests_for_customer(&self, customer_id: &str) -> Result<Vec<LactateTest>> {
        let ids = self.test_ids_for(customer_id)?;

        let mut tests = Vec::with_capacity(ids.len());
        for id in ids {
            let (customer_id, created_at, protocol) = self.test_header(&id)?;
            let stages = self.stages_for(&id)?;
            tests.push(LactateTest {
                id,
                customer_id,
                created_at,
                protocol,
                stages,
            });
        }
        debug!(tests = tests.len(), "Loaded customer tests");
        Ok(tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LactrsError;
    use crate::thresholds::ThresholdMethod;
    use rust_decimal_macros::dec;

    fn protocol() -> TestProtocol {
        TestProtocol {
            stage_duration_min: 3.0,
            unit: LoadUnit::Kmh,
            closed: false,
        }
    }

    #[test]
    fn test_stage_upsert_roundtrip() {
        let mut db = Database::in_memory().unwrap();
        let id = db.create_test("c-1", &protocol(), Utc::now()).unwrap();

        let mut corrected = StageRow::new(2, 12.0, 2.4);
        corrected.duration_min = Some(1.5);
        corrected.is_final_approximation = true;
        corrected.theoretical_load = Some(14.0);

        assert!(!db.upsert_stage(&id, StageRow::new(1, 10.0, 1.1)).unwrap());
        assert!(!db.upsert_stage(&id, corrected.clone()).unwrap());
        assert!(db.upsert_stage(&id, corrected.clone()).unwrap());

        let series = db.load_series(&id).unwrap();
        assert_eq!(series.stages.len(), 2);
        assert_eq!(series.stages[1], corrected);
        assert_eq!(db.protocol(&id).unwrap().unit, LoadUnit::Kmh);
    }

    #[test]
    fn test_closed_test_refuses_stages() {
        let mut db = Database::in_memory().unwrap();
        let id = db.create_test("c-1", &protocol(), Utc::now()).unwrap();
        db.close_test(&id).unwrap();

        let result = db.upsert_stage(&id, StageRow::new(1, 10.0, 1.1));
        assert!(matches!(result, Err(LactrsError::Storage(StorageError::TestClosed { .. }))));
        assert!(db.close_test("missing").is_err());
    }

    #[test]
    fn test_thresholds_roundtrip() {
        let mut db = Database::in_memory().unwrap();
        let thresholds = Thresholds {
            lt1: None,
            lt2: Some(ThresholdPoint {
                load: 284.375,
                lactate: 4.0,
                heart_rate: Some(163.5),
            }),
        };
        let selection = MethodSelection::Computed(ThresholdMethod::Dickhuth);
        db.save_thresholds("t-1", selection, &thresholds).unwrap();

        assert_eq!(db.load_thresholds("t-1", selection).unwrap(), Some(thresholds));
        assert_eq!(db.load_thresholds("t-1", MethodSelection::Adjusted).unwrap(), None);
    }

    #[test]
    fn test_zones_roundtrip() {
        let mut db = Database::in_memory().unwrap();
        let key = ZoneKey::new("c-1", "t-1", MethodSelection::Adjusted);
        let stored = StoredZones {
            model: ZoneModel::ThreeZonesA,
            zones: vec![TrainingZone {
                number: 1,
                name: "Low Intensity".to_string(),
                min: dec!(0),
                max: dec!(200.5),
                description: None,
            }],
        };
        db.save_zones(&key, &stored).unwrap();
        assert_eq!(db.load_zones(&key).unwrap(), Some(stored));
    }
}
