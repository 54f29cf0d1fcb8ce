use chrono::{Duration, TimeZone, Utc};
use tempfile::tempdir;

use lactrs::{
    build_trend, Database, IncomingStage, LactrsError, LoadUnit, MethodSelection, StageIngestor, StageStore,
    StorageError, TestEvaluator, TestProtocol, TestRepository, ThresholdMethod, ThresholdStore, ZoneKey, ZoneModel,
    ZoneStore,
};

/// SQLite persistence across connections

fn protocol(unit: LoadUnit) -> TestProtocol {
    TestProtocol {
        stage_duration_min: 3.0,
        unit,
        closed: false,
    }
}

fn ingest_all(db: &mut Database, test_id: &str, stages: &[(f64, f64)]) {
    let ingestor = StageIngestor::new();
    for (i, &(load, lactate)) in stages.iter().enumerate() {
        ingestor
            .ingest(
                db,
                test_id,
                IncomingStage::new(i as u32 + 1, load).with_lactate(lactate).with_duration(3.0),
            )
            .unwrap();
    }
}

const BIKE: [(f64, f64); 5] = [(100.0, 1.0), (150.0, 1.3), (200.0, 1.8), (250.0, 2.9), (300.0, 4.5)];
const RUN: [(f64, f64); 4] = [(8.0, 1.1), (10.0, 1.6), (12.0, 2.8), (14.0, 4.9)];

#[test]
fn test_results_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lactrs.db");
    let selection = MethodSelection::Computed(ThresholdMethod::Dickhuth);

    let test_id = {
        let mut db = Database::new(&path).unwrap();
        let test_id = db.create_test("c-1", &protocol(LoadUnit::Watt), Utc::now()).unwrap();
        ingest_all(&mut db, &test_id, &BIKE);
        TestEvaluator::new()
            .evaluate(&mut db, "c-1", &test_id, selection, ZoneModel::ThreeZonesB)
            .unwrap();
        db.close_test(&test_id).unwrap();
        test_id
    };

    let db = Database::new(&path).unwrap();
    let series = db.load_series(&test_id).unwrap();
    assert_eq!(series.stages.len(), 5);
    assert_eq!(series.max_load(), Some(300.0));
    assert!(db.protocol(&test_id).unwrap().closed);

    let thresholds = db.load_thresholds(&test_id, selection).unwrap().unwrap();
    assert!((thresholds.lt2.unwrap().load - 284.375).abs() < 1e-9);
    assert!(db.load_thresholds(&test_id, MethodSelection::Adjusted).unwrap().is_none());

    let stored = db
        .load_zones(&ZoneKey::new("c-1", &test_id, selection))
        .unwrap()
        .unwrap();
    assert_eq!(stored.model, ZoneModel::ThreeZonesB);
    assert_eq!(stored.zones.len(), 3);
}

#[test]
fn test_closed_test_in_database_refuses_stages() {
    let mut db = Database::in_memory().unwrap();
    let test_id = db.create_test("c-1", &protocol(LoadUnit::Watt), Utc::now()).unwrap();
    ingest_all(&mut db, &test_id, &BIKE);
    db.close_test(&test_id).unwrap();

    let err = StageIngestor::new()
        .ingest(&mut db, &test_id, IncomingStage::new(6, 350.0).with_lactate(7.0))
        .unwrap_err();
    assert!(matches!(err, LactrsError::Storage(StorageError::TestClosed { .. })));
    assert_eq!(db.load_series(&test_id).unwrap().stages.len(), 5);
}

#[test]
fn test_unknown_test_is_not_found() {
    let mut db = Database::in_memory().unwrap();
    assert!(matches!(
        db.load_series("missing"),
        Err(LactrsError::Storage(StorageError::NotFound { .. }))
    ));
    assert!(db.close_test("missing").is_err());
}

#[test]
fn test_trend_from_database() {
    let mut db = Database::in_memory().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap();

    let bike_late = db
        .create_test("c-1", &protocol(LoadUnit::Watt), start + Duration::days(56))
        .unwrap();
    let bike_early = db.create_test("c-1", &protocol(LoadUnit::Watt), start).unwrap();
    let run = db
        .create_test("c-1", &protocol(LoadUnit::Kmh), start + Duration::days(7))
        .unwrap();
    let other = db.create_test("c-2", &protocol(LoadUnit::Watt), start).unwrap();

    let shifted: Vec<(f64, f64)> = BIKE.iter().map(|&(load, lactate)| (load + 10.0, lactate)).collect();
    ingest_all(&mut db, &bike_late, &shifted);
    ingest_all(&mut db, &bike_early, &BIKE);
    ingest_all(&mut db, &run, &RUN);
    ingest_all(&mut db, &other, &BIKE);

    let tests = db.tests_for_customer("c-1").unwrap();
    assert_eq!(tests.len(), 3);
    assert_eq!(tests[0].id, bike_early);
    assert_eq!(tests[0].created_at, start);

    let trend = build_trend(&db, "c-1", ThresholdMethod::Dickhuth).unwrap();
    assert_eq!(trend.watt.len(), 2);
    assert_eq!(trend.kmh.len(), 1);
    let gain = trend.watt[1].lt2_load.unwrap() - trend.watt[0].lt2_load.unwrap();
    assert!((gain - 10.0).abs() < 1e-9);
    // 4.0 between (12, 2.8) and (14, 4.9)
    assert!((trend.kmh[0].lt2_load.unwrap() - (12.0 + 2.0 * 1.2 / 2.1)).abs() < 1e-9);
}

#[test]
fn test_amended_reference_stage_recorrects_in_database() {
    let mut db = Database::in_memory().unwrap();
    let test_id = db.create_test("c-1", &protocol(LoadUnit::Watt), Utc::now()).unwrap();
    let ingestor = StageIngestor::new();

    ingestor
        .ingest(&mut db, &test_id, IncomingStage::new(2, 220.0).with_lactate(4.4).with_duration(1.5))
        .unwrap();
    ingestor
        .ingest(&mut db, &test_id, IncomingStage::new(1, 200.0).with_lactate(1.2).with_duration(3.0))
        .unwrap();
    assert_eq!(db.load_series(&test_id).unwrap().max_load(), Some(240.0));

    let outcome = ingestor
        .ingest(&mut db, &test_id, IncomingStage::new(1, 180.0).with_lactate(1.2).with_duration(3.0))
        .unwrap();
    assert_eq!(outcome.recorrected, vec![2]);
    // 180 + 40 / 0.5
    assert_eq!(db.load_series(&test_id).unwrap().get(2).unwrap().theoretical_load, Some(260.0));
}
