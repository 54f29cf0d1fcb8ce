use chrono::{Duration, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::fs;
use tempfile::tempdir;

use lactrs::input::read_stage_file;
use lactrs::{
    build_trend, calculate_thresholds, calculate_training_zones, IncomingStage, LactrsError, LoadUnit, MemoryStore,
    MethodSelection, StageIngestor, StageSeries, StageStore, StorageError, TestEvaluator, TestProtocol,
    ThresholdMethod, ThresholdPoint, ThresholdStore, Thresholds, ZoneKey, ZoneModel, ZoneStore,
};

/// End-to-end workflows through the public API

const REFERENCE_STAGES: [(f64, f64); 6] =
    [(100.0, 1.0), (150.0, 1.3), (200.0, 1.8), (250.0, 2.9), (300.0, 4.5), (350.0, 7.0)];

fn protocol() -> TestProtocol {
    TestProtocol {
        stage_duration_min: 3.0,
        unit: LoadUnit::Watt,
        closed: false,
    }
}

fn ingest_reference(store: &mut MemoryStore, test_id: &str) {
    let ingestor = StageIngestor::new();
    for (i, &(load, lactate)) in REFERENCE_STAGES.iter().enumerate() {
        ingestor
            .ingest(
                store,
                test_id,
                IncomingStage::new(i as u32 + 1, load).with_lactate(lactate).with_duration(3.0),
            )
            .unwrap();
    }
}

#[test]
fn test_stage_file_to_zones() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ramp.csv");
    let mut content = String::from("Stage,Power,Lactate,HR\n");
    for (i, (load, lactate)) in REFERENCE_STAGES.iter().enumerate() {
        content.push_str(&format!("{},{},{},{}\n", i + 1, load, lactate, 120 + 8 * i));
    }
    fs::write(&path, content).unwrap();

    let rows = read_stage_file(&path).unwrap();
    let series = StageSeries::new("file", rows);
    let thresholds = calculate_thresholds(&series.samples(), ThresholdMethod::Dickhuth);

    let lt2 = thresholds.lt2.unwrap();
    assert!((lt2.load - 284.375).abs() < 1e-9);
    assert_eq!(lt2.lactate, 4.0);
    // Heart rate interpolated between 144 and 152 bpm
    let hr = lt2.heart_rate.unwrap();
    assert!(hr > 144.0 && hr < 152.0);

    let zones = calculate_training_zones(
        thresholds.lt1,
        thresholds.lt2,
        series.max_load().unwrap(),
        ZoneModel::FiveZones,
    )
    .unwrap();
    assert_eq!(zones.len(), 5);
    assert_eq!(zones.last().unwrap().max, dec!(350));
    assert!((zones[2].max.to_f64().unwrap() - 284.375).abs() < 1e-6);
}

#[test]
fn test_every_method_orders_thresholds() {
    let series = StageSeries::new(
        "t",
        REFERENCE_STAGES
            .iter()
            .enumerate()
            .map(|(i, &(load, lactate))| lactrs::StageRow::new(i as u32 + 1, load, lactate))
            .collect(),
    );
    for method in ThresholdMethod::ALL {
        let thresholds = calculate_thresholds(&series.samples(), method);
        let (lt1, lt2) = (thresholds.lt1.unwrap(), thresholds.lt2.unwrap());
        assert!(lt1.load < lt2.load, "{}: {} >= {}", method, lt1.load, lt2.load);
        assert!(lt1.load >= 100.0 && lt2.load <= 350.0, "{} out of range", method);
    }
}

#[test]
fn test_ingest_evaluate_and_review() {
    let mut store = MemoryStore::new();
    let test_id = store.create_test("c-1", protocol(), Utc::now());
    ingest_reference(&mut store, &test_id);

    let evaluator = TestEvaluator::new();
    let evaluation = evaluator
        .evaluate(
            &mut store,
            "c-1",
            &test_id,
            MethodSelection::Computed(ThresholdMethod::Dickhuth),
            ZoneModel::FiveZones,
        )
        .unwrap();
    assert_eq!(evaluation.max_load, 350.0);
    assert_eq!(evaluation.zones.len(), 5);

    let stored = store
        .load_thresholds(&test_id, MethodSelection::Computed(ThresholdMethod::Dickhuth))
        .unwrap()
        .unwrap();
    assert_eq!(stored, evaluation.thresholds);

    // Reviewer moves both thresholds
    let reviewed = Thresholds {
        lt1: Some(ThresholdPoint::new(180.0, 1.6)),
        lt2: Some(ThresholdPoint::new(290.0, 4.1)),
    };
    evaluator.adjust(&mut store, &test_id, reviewed).unwrap();

    let adjusted = evaluator
        .evaluate(&mut store, "c-1", &test_id, MethodSelection::Adjusted, ZoneModel::ThreeZonesA)
        .unwrap();
    assert_eq!(adjusted.thresholds, reviewed);
    let uppers: Vec<_> = adjusted.zones.iter().map(|z| z.max).collect();
    assert_eq!(uppers, vec![dec!(180), dec!(290), dec!(350)]);

    // Both zone sets are kept side by side
    let computed_key = ZoneKey::new("c-1", &test_id, MethodSelection::Computed(ThresholdMethod::Dickhuth));
    let adjusted_key = ZoneKey::new("c-1", &test_id, MethodSelection::Adjusted);
    assert_eq!(store.load_zones(&computed_key).unwrap().unwrap().zones.len(), 5);
    assert_eq!(store.load_zones(&adjusted_key).unwrap().unwrap().model, ZoneModel::ThreeZonesA);
}

#[test]
fn test_cut_short_final_stage_raises_max_load() {
    let mut store = MemoryStore::new();
    let test_id = store.create_test("c-1", protocol(), Utc::now());
    ingest_reference(&mut store, &test_id);

    let outcome = StageIngestor::new()
        .ingest(
            &mut store,
            &test_id,
            IncomingStage::new(7, 400.0).with_lactate(9.5).with_duration(1.5),
        )
        .unwrap();
    let correction = outcome.correction.unwrap();
    assert!(correction.is_final_approximation);
    assert!(correction.theoretical_load > 400.0);

    let series = store.load_series(&test_id).unwrap();
    assert_eq!(series.max_load(), Some(correction.theoretical_load));
}

#[test]
fn test_closed_test_refuses_stages() {
    let mut store = MemoryStore::new();
    let test_id = store.create_test("c-1", protocol(), Utc::now());
    ingest_reference(&mut store, &test_id);
    store.close_test(&test_id).unwrap();

    let err = StageIngestor::new()
        .ingest(&mut store, &test_id, IncomingStage::new(2, 160.0).with_lactate(1.4))
        .unwrap_err();
    assert!(matches!(
        err,
        LactrsError::Storage(StorageError::TestClosed { stage: 2, .. })
    ));
    assert_eq!(store.load_series(&test_id).unwrap().get(2).unwrap().load, Some(150.0));
}

#[test]
fn test_trend_over_stored_tests() {
    let mut store = MemoryStore::new();
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let later = store.create_test("c-1", protocol(), start + Duration::days(42));
    let earlier = store.create_test("c-1", protocol(), start);
    ingest_reference(&mut store, &earlier);

    // Six weeks later everything shifted up by 15 W
    let ingestor = StageIngestor::new();
    for (i, &(load, lactate)) in REFERENCE_STAGES.iter().enumerate() {
        ingestor
            .ingest(
                &mut store,
                &later,
                IncomingStage::new(i as u32 + 1, load + 15.0).with_lactate(lactate).with_duration(3.0),
            )
            .unwrap();
    }
    store.create_test("c-2", protocol(), start);

    let trend = build_trend(&store, "c-1", ThresholdMethod::Mader).unwrap();
    assert_eq!(trend.watt.len(), 2);
    assert!(trend.kmh.is_empty());
    assert_eq!(trend.watt[0].created_at, start);
    let gain = trend.watt[1].lt2_load.unwrap() - trend.watt[0].lt2_load.unwrap();
    assert!((gain - 15.0).abs() < 1e-9);
}
