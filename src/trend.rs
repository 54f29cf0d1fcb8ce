//! Threshold progression across a customer's tests
//!
//! Each historical test is evaluated independently with the selected method,
//! so the detections run on the rayon pool. Order is preserved by the
//! indexed collect, and the result is split by protocol unit because watt and
//! km/h loads cannot share an axis.

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::models::{LactateTest, LoadUnit, Trend, TrendPoint};
use crate::store::TestRepository;
use crate::thresholds::{ThresholdDetector, ThresholdMethod};

/// Builds threshold trends from a test repository
pub struct TrendAggregator<'a, R: TestRepository + ?Sized> {
    repository: &'a R,
    method: ThresholdMethod,
    detector: ThresholdDetector,
}

impl<'a, R: TestRepository + ?Sized> TrendAggregator<'a, R> {
    pub fn new(repository: &'a R, method: ThresholdMethod) -> Self {
        TrendAggregator {
            repository,
            method,
            detector: ThresholdDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: ThresholdDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Threshold points of every usable test of the customer, oldest first
    #[instrument(skip(self), fields(method = %self.method))]
    pub fn build_trend(&self, customer_id: &str) -> Result<Trend> {
        let mut tests = self.repository.tests_for_customer(customer_id)?;
        tests.sort_by_key(|test| test.created_at);

        // The repository need not be Sync; only the detector crosses threads
        let (detector, method) = (&self.detector, self.method);
        let points: Vec<(LoadUnit, Option<TrendPoint>)> = tests
            .par_iter()
            .map(|test| (test.protocol.unit, trend_point(detector, method, test)))
            .collect();

        let mut trend = Trend::default();
        let mut skipped = 0usize;
        for (unit, point) in points {
            match (unit, point) {
                (LoadUnit::Watt, Some(point)) => trend.watt.push(point),
                (LoadUnit::Kmh, Some(point)) => trend.kmh.push(point),
                (_, None) => skipped += 1,
            }
        }

        info!(
            customer_id,
            tests = tests.len(),
            watt = trend.watt.len(),
            kmh = trend.kmh.len(),
            skipped,
            "Built threshold trend"
        );
        Ok(trend)
    }
}

fn trend_point(detector: &ThresholdDetector, method: ThresholdMethod, test: &LactateTest) -> Option<TrendPoint> {
    let samples = test.series().samples();
    let min_samples = detector.constants().min_samples.max(3);
    if samples.len() < min_samples {
        debug!(test_id = %test.id, samples = samples.len(), "Skipping test with too few samples");
        return None;
    }

    let thresholds = detector.detect(&samples, method);
    if thresholds.is_empty() {
        debug!(test_id = %test.id, "Skipping test without thresholds");
        return None;
    }

    Some(TrendPoint {
        created_at: test.created_at,
        lt1_load: thresholds.lt1.map(|p| p.load),
        lt1_lactate: thresholds.lt1.map(|p| p.lactate),
        lt2_load: thresholds.lt2.map(|p| p.load),
        lt2_lactate: thresholds.lt2.map(|p| p.lactate),
    })
}

/// Threshold trend of a customer with default constants
pub fn build_trend<R: TestRepository + ?Sized>(
    repository: &R,
    customer_id: &str,
    method: ThresholdMethod,
) -> Result<Trend> {
    TrendAggregator::new(repository, method).build_trend(customer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StageRow, TestProtocol};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn test_with(id: &str, unit: LoadUnit, days: i64, rows: &[(f64, f64)]) -> LactateTest {
        LactateTest {
            id: id.to_string(),
            customer_id: "c-1".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::days(days),
            protocol: TestProtocol {
                stage_duration_min: 3.0,
                unit,
                closed: true,
            },
            stages: rows
                .iter()
                .enumerate()
                .map(|(i, &(load, lactate))| StageRow::new(i as u32 + 1, load, lactate))
                .collect(),
        }
    }

    fn curve(shift: f64) -> Vec<(f64, f64)> {
        [(100.0, 1.0), (150.0, 1.3), (200.0, 1.8), (250.0, 2.9), (300.0, 4.5), (350.0, 7.0)]
            .iter()
            .map(|&(load, lactate)| (load + shift, lactate))
            .collect()
    }

    #[test]
    fn test_trend_sorted_and_split_by_unit() {
        let mut store = MemoryStore::new();
        store.insert_test(test_with("late", LoadUnit::Watt, 60, &curve(20.0)));
        store.insert_test(test_with("early", LoadUnit::Watt, 0, &curve(0.0)));
        store.insert_test(test_with(
            "run",
            LoadUnit::Kmh,
            30,
            &[(8.0, 1.1), (10.0, 1.6), (12.0, 2.8), (14.0, 4.9)],
        ));

        let trend = build_trend(&store, "c-1", ThresholdMethod::Dickhuth).unwrap();

        assert_eq!(trend.watt.len(), 2);
        assert_eq!(trend.kmh.len(), 1);
        assert!(trend.watt[0].created_at < trend.watt[1].created_at);
        let (first, second) = (trend.watt[0].lt2_load.unwrap(), trend.watt[1].lt2_load.unwrap());
        assert!((second - first - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_skips_short_and_flat_tests() {
        let mut store = MemoryStore::new();
        store.insert_test(test_with("short", LoadUnit::Watt, 0, &[(100.0, 1.0), (200.0, 5.0)]));
        // Lactate never rises: no threshold, no placeholder point
        store.insert_test(test_with("flat", LoadUnit::Watt, 1, &[(100.0, 1.0), (150.0, 1.0), (200.0, 1.0)]));
        store.insert_test(test_with("ok", LoadUnit::Watt, 2, &curve(0.0)));

        let trend = build_trend(&store, "c-1", ThresholdMethod::Dickhuth).unwrap();
        assert_eq!(trend.watt.len(), 1);
        assert!(trend.kmh.is_empty());
    }

    #[test]
    fn test_trend_uses_theoretical_loads() {
        let mut test = test_with("cut", LoadUnit::Watt, 0, &curve(0.0));
        let last = test.stages.last_mut().unwrap();
        last.is_final_approximation = true;
        last.theoretical_load = Some(400.0);

        let mut store = MemoryStore::new();
        store.insert_test(test);
        let trend = build_trend(&store, "c-1", ThresholdMethod::Mader).unwrap();
        assert_eq!(trend.watt.len(), 1);
    }

    #[test]
    fn test_unknown_customer_is_empty() {
        let store = MemoryStore::new();
        let trend = build_trend(&store, "nobody", ThresholdMethod::Dmax).unwrap();
        assert_eq!(trend, Trend::default());
    }
}
