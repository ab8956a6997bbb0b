//! Pipeline configuration.
//!
//! A [`Config`] is built once at startup from CLI arguments and passed by
//! reference into every stage. Nothing reads configuration ambiently.

use std::path::PathBuf;

/// A geographic bounding box in decimal-degree lon/lat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl MapBounds {
    pub const fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    /// Approximate bounds for the Beijing taxi dataset.
    pub const fn beijing() -> Self {
        Self::new(116.15, 116.6, 39.75, 40.1)
    }
}

/// Immutable run configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the per-vehicle trace files (`*.txt`).
    pub data_dir: PathBuf,
    /// Directory where rendered frames are written.
    pub output_dir: PathBuf,
    /// Width of each heatmap time bucket, in hours.
    pub time_interval_hours: u32,
    /// Samples below this speed are kept as congestion points.
    pub speed_threshold_kmh: f64,
    /// Longest report gap over which a speed is still derived, in seconds.
    pub max_time_delta_seconds: f64,
    /// Hard ceiling above which a derived speed is discarded as a GPS error.
    pub max_speed_kmh: f64,
    /// Number of trace files processed per batch.
    pub batch_size: usize,
    /// Name of the slow-point cache artifact, resolved in the working directory.
    pub cache_filename: PathBuf,
    /// Spatial window shared by every histogram and frame.
    pub map_bounds: MapBounds,
    /// Optional uniform down-sampling ratio in (0, 1]; 1.0 keeps everything.
    pub sample_fraction: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("taxi_log_2008_by_id"),
            output_dir: PathBuf::from("heatmaps_output"),
            time_interval_hours: 1,
            speed_threshold_kmh: 20.0,
            max_time_delta_seconds: 600.0,
            max_speed_kmh: 150.0,
            batch_size: 500,
            cache_filename: PathBuf::from("cached_slow_points.bin"),
            map_bounds: MapBounds::beijing(),
            sample_fraction: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bounds_are_ordered() {
        let c = Config::default();
        assert!(c.map_bounds.lon_min < c.map_bounds.lon_max);
        assert!(c.map_bounds.lat_min < c.map_bounds.lat_max);
    }

    #[test]
    fn test_default_thresholds() {
        let c = Config::default();
        assert_eq!(c.speed_threshold_kmh, 20.0);
        assert_eq!(c.max_time_delta_seconds, 600.0);
        assert_eq!(c.max_speed_kmh, 150.0);
        assert_eq!(c.batch_size, 500);
    }
}
