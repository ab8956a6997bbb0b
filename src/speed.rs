//! Speed derivation and slow-point filtering.
//!
//! The heart of the pipeline: group position reports by vehicle, sort each
//! group by time, derive the speed between every report and its immediate
//! predecessor from the haversine distance, then keep only the points
//! moving slower than the congestion threshold.

use crate::ingest::RawReport;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Report pairs closer together than this (seconds) carry no usable speed.
const MIN_TIME_DELTA_SECONDS: f64 = 1.0;

/// A derived speed for one report, positioned at the later point of the pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedSample {
    pub timestamp: NaiveDateTime,
    pub longitude: f64,
    pub latitude: f64,
    pub speed_kmh: f64,
}

/// A congestion point: a speed sample below the slow threshold, with the
/// speed itself dropped after filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowPoint {
    pub timestamp: NaiveDateTime,
    pub longitude: f64,
    pub latitude: f64,
}

/// Great-circle distance between two lon/lat points in kilometers.
pub fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lon1, lat1, lon2, lat2) = (
        lon1.to_radians(),
        lat1.to_radians(),
        lon2.to_radians(),
        lat2.to_radians(),
    );

    let dlon = lon2 - lon1;
    let dlat = lat2 - lat1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

/// Derives one [`SpeedSample`] per consecutive report pair within each vehicle.
///
/// Reports are grouped by entity id and stably sorted by timestamp inside
/// each group, so a report's predecessor is always its immediate neighbor in
/// time regardless of input order. Two validity rules apply, deliberately
/// asymmetric:
///
/// - a pair whose time delta falls outside `(1 s, max_time_delta_seconds]`
///   yields a sample with `speed_kmh = 0` and is NOT discarded here;
/// - a derived speed above `max_speed_kmh` discards the sample outright.
///
/// The zero-speed samples from over-long gaps later pass the slow-point
/// threshold and show up as congestion points. That reproduces the observed
/// behavior of the system this replaces and is covered by tests; do not
/// "fix" it here.
pub fn derive_speed_samples(
    reports: Vec<RawReport>,
    max_time_delta_seconds: f64,
    max_speed_kmh: f64,
) -> Vec<SpeedSample> {
    let mut by_entity: BTreeMap<String, Vec<RawReport>> = BTreeMap::new();
    for report in reports {
        by_entity
            .entry(report.entity_id.clone())
            .or_default()
            .push(report);
    }

    let mut samples = Vec::new();
    for (_, mut group) in by_entity {
        group.sort_by_key(|r| r.timestamp);

        for pair in group.windows(2) {
            let (prev, curr) = (&pair[0], &pair[1]);
            let delta_seconds = (curr.timestamp - prev.timestamp).num_seconds() as f64;

            let speed_kmh = if delta_seconds > MIN_TIME_DELTA_SECONDS
                && delta_seconds <= max_time_delta_seconds
            {
                let distance_km =
                    haversine(prev.longitude, prev.latitude, curr.longitude, curr.latitude);
                distance_km / (delta_seconds / 3600.0)
            } else {
                0.0
            };

            if speed_kmh > max_speed_kmh {
                continue;
            }

            samples.push(SpeedSample {
                timestamp: curr.timestamp,
                longitude: curr.longitude,
                latitude: curr.latitude,
                speed_kmh,
            });
        }
    }

    samples
}

/// Keeps only samples below `speed_threshold_kmh`, projected to [`SlowPoint`].
pub fn filter_slow_points(samples: Vec<SpeedSample>, speed_threshold_kmh: f64) -> Vec<SlowPoint> {
    samples
        .into_iter()
        .filter(|s| s.speed_kmh < speed_threshold_kmh)
        .map(|s| SlowPoint {
            timestamp: s.timestamp,
            longitude: s.longitude,
            latitude: s.latitude,
        })
        .collect()
}
