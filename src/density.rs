//! Spatial binning and the global density range.
//!
//! Every frame of the output animation shares one color scale. To derive
//! it, a first full pass bins each time bucket's slow points into a fixed
//! 250×250 grid and pools every positive bin count; the 0th/99th
//! percentiles of that pool become the log-scale normalization range used
//! by all frames.

use crate::config::{Config, MapBounds};
use crate::speed::SlowPoint;
use crate::stats::{mean, percentile};
use anyhow::{Result, bail};
use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, info};

/// Grid resolution of the range-estimation pass.
const RANGE_BINS: usize = 250;

/// Buckets with fewer points than this contribute nothing to the range.
pub const MIN_POINTS_PER_BUCKET: usize = 5;

const LOWER_PERCENTILE: f64 = 0.0;
const UPPER_PERCENTILE: f64 = 99.0;

/// Log-scale color normalization bounds shared by every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityRange {
    /// Lower bound, clamped to at least 1.0 so a log scale stays defined.
    pub min: f64,
    /// Upper bound, strictly greater than `min`.
    pub max: f64,
}

/// Output of the range pass: the normalization range plus the bucket-walk
/// boundaries reused verbatim by the render pass.
#[derive(Debug, Clone, Copy)]
pub struct GlobalDensity {
    pub range: DensityRange,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// A fixed-resolution 2D count grid over a bounding box, row-major with
/// longitude on x and latitude on y.
#[derive(Debug)]
pub struct Histogram2d {
    bins: usize,
    bounds: MapBounds,
    counts: Vec<u32>,
}

impl Histogram2d {
    pub fn new(bins: usize, bounds: MapBounds) -> Self {
        Self {
            bins,
            bounds,
            counts: vec![0; bins * bins],
        }
    }

    /// Bins one point. Points outside the bounds are ignored; a point
    /// exactly on the upper edge lands in the last bin.
    pub fn record(&mut self, longitude: f64, latitude: f64) {
        let x = bin_index(longitude, self.bounds.lon_min, self.bounds.lon_max, self.bins);
        let y = bin_index(latitude, self.bounds.lat_min, self.bounds.lat_max, self.bins);
        if let (Some(x), Some(y)) = (x, y) {
            self.counts[y * self.bins + x] += 1;
        }
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count_at(&self, x: usize, y: usize) -> u32 {
        self.counts[y * self.bins + x]
    }
}

fn bin_index(value: f64, min: f64, max: f64, bins: usize) -> Option<usize> {
    if !(min..=max).contains(&value) {
        return None;
    }
    let idx = ((value - min) / (max - min) * bins as f64) as usize;
    Some(idx.min(bins - 1))
}

/// Rounds down to the containing hour.
pub fn floor_hour(t: NaiveDateTime) -> NaiveDateTime {
    t - Duration::minutes(t.minute() as i64)
        - Duration::seconds(t.second() as i64)
        - Duration::nanoseconds(t.nanosecond() as i64)
}

/// Rounds up to the next hour boundary; exact boundaries stay put.
pub fn ceil_hour(t: NaiveDateTime) -> NaiveDateTime {
    let floored = floor_hour(t);
    if floored == t {
        floored
    } else {
        floored + Duration::hours(1)
    }
}

/// The fixed-width bucket walk over `[start, end)` shared by the range and
/// render passes.
pub fn buckets(
    start: NaiveDateTime,
    end: NaiveDateTime,
    interval_hours: u32,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let step = Duration::hours(interval_hours as i64);
    let mut out = Vec::new();
    let mut current = start;
    while current < end {
        out.push((current, current + step));
        current += step;
    }
    out
}

/// First full pass: derives the global [`DensityRange`] from all slow
/// points, plus the hour-aligned walk boundaries.
///
/// # Errors
///
/// Fails on an empty point set, a zero bucket width, or a degenerate time
/// range (start ≥ end).
pub fn compute_global_density_range(points: &[SlowPoint], config: &Config) -> Result<GlobalDensity> {
    if config.time_interval_hours == 0 {
        bail!("time interval must be at least one hour");
    }
    let (Some(min_ts), Some(max_ts)) = (
        points.iter().map(|p| p.timestamp).min(),
        points.iter().map(|p| p.timestamp).max(),
    ) else {
        bail!("cannot derive a time range from an empty point set");
    };

    let start = floor_hour(min_ts);
    let end = ceil_hour(max_ts);
    if start >= end {
        bail!("degenerate time range: {start} >= {end}");
    }

    let walk = buckets(start, end, config.time_interval_hours);
    info!(
        start = %start,
        end = %end,
        intervals = walk.len(),
        "Computing global density range"
    );

    let mut all_counts: Vec<f64> = Vec::new();
    for (bucket_start, bucket_end) in walk {
        let subset: Vec<&SlowPoint> = points
            .iter()
            .filter(|p| p.timestamp >= bucket_start && p.timestamp < bucket_end)
            .collect();

        if subset.len() < MIN_POINTS_PER_BUCKET {
            continue;
        }

        let mut histogram = Histogram2d::new(RANGE_BINS, config.map_bounds);
        for p in &subset {
            histogram.record(p.longitude, p.latitude);
        }

        let positive = histogram.counts().iter().filter(|&&c| c > 0);
        all_counts.extend(positive.map(|&c| c as f64));

        debug!(bucket = %bucket_start, points = subset.len(), "Bucket binned for range pass");
    }

    let range = if all_counts.is_empty() {
        info!("No bucket reached the minimum point count, using default density range");
        DensityRange {
            min: 1.0,
            max: 10.0,
        }
    } else {
        info!(
            occupied_bins = all_counts.len(),
            mean_count = mean(&all_counts),
            "Pooled bin counts across buckets"
        );
        let mut min = percentile(&all_counts, LOWER_PERCENTILE);
        let mut max = percentile(&all_counts, UPPER_PERCENTILE);
        min = min.max(1.0);
        if max <= min {
            let abs_max = all_counts.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            max = (min * 10.0).max(abs_max);
        }
        DensityRange { min, max }
    };

    info!(min = range.min, max = range.max, "Global density range ready");
    Ok(GlobalDensity { range, start, end })
}
