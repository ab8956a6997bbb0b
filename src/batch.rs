//! Batched ingestion of the trace-file universe.
//!
//! The full input can be far larger than memory, so files are processed in
//! fixed-size batches: load, derive speeds, filter, append to the
//! accumulator, drop everything batch-local. Only the slow points survive a
//! batch.

use crate::config::Config;
use crate::ingest;
use crate::speed::{self, SlowPoint};
use anyhow::{Result, bail};
use tracing::{debug, info, warn};

/// Runs the batch loop over every trace file in `config.data_dir` and
/// returns the accumulated slow points.
///
/// Invalid files (empty, malformed, non-numeric coordinates) are skipped
/// with a warning; a batch that yields nothing contributes nothing. The
/// only error here is a data directory with no trace files at all.
pub fn collect_slow_points(config: &Config) -> Result<Vec<SlowPoint>> {
    let files = ingest::enumerate_trace_files(&config.data_dir)?;
    if files.is_empty() {
        bail!(
            "no trace files (*.txt) found in {}",
            config.data_dir.display()
        );
    }

    let num_batches = files.len().div_ceil(config.batch_size);
    info!(
        total_files = files.len(),
        batch_size = config.batch_size,
        num_batches,
        "Starting batched ingestion"
    );

    let mut slow_points: Vec<SlowPoint> = Vec::new();

    for (batch_index, batch_files) in files.chunks(config.batch_size).enumerate() {
        debug!(
            batch = batch_index + 1,
            num_batches,
            files = batch_files.len(),
            "Loading batch"
        );

        let mut batch_reports = Vec::new();
        let mut valid_files = 0usize;
        for path in batch_files {
            match ingest::read_trace_file(path) {
                Ok(mut reports) => {
                    batch_reports.append(&mut reports);
                    valid_files += 1;
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping trace file");
                }
            }
        }

        if batch_reports.is_empty() {
            debug!(batch = batch_index + 1, "Batch produced no valid records");
            continue;
        }

        // derive_speed_samples takes ownership, so the raw reports are gone
        // before the slow points are appended.
        let samples = speed::derive_speed_samples(
            batch_reports,
            config.max_time_delta_seconds,
            config.max_speed_kmh,
        );
        let batch_slow = speed::filter_slow_points(samples, config.speed_threshold_kmh);

        info!(
            batch = batch_index + 1,
            num_batches,
            valid_files,
            slow_points = batch_slow.len(),
            "Batch complete"
        );

        slow_points.extend(batch_slow);
    }

    info!(total_slow_points = slow_points.len(), "Ingestion complete");
    Ok(slow_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config_for(dir: &std::path::Path, batch_size: usize) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            batch_size,
            ..Config::default()
        }
    }

    fn point_set(points: &[SlowPoint]) -> BTreeSet<(i64, String, String)> {
        points
            .iter()
            .map(|p| {
                (
                    p.timestamp.and_utc().timestamp(),
                    format!("{:.6}", p.longitude),
                    format!("{:.6}", p.latitude),
                )
            })
            .collect()
    }

    fn write_fixture_files(dir: &std::path::Path) {
        // Three slow-moving vehicles plus one invalid file.
        for i in 0..3 {
            let lon = 116.30 + i as f64 * 0.01;
            fs::write(
                dir.join(format!("{i}.txt")),
                format!(
                    "{i},2008-02-02 13:00:00,{lon:.5},39.90000\n\
                     {i},2008-02-02 13:05:00,{:.5},39.90000\n",
                    lon + 0.005
                ),
            )
            .unwrap();
        }
        fs::write(dir.join("broken.txt"), "not,a,valid\n").unwrap();
    }

    #[test]
    fn test_invalid_files_are_skipped_not_fatal() {
        let dir = scratch_dir("congestion_heatmap_batch_skip");
        write_fixture_files(&dir);

        let points = collect_slow_points(&config_for(&dir, 10)).unwrap();
        // ~0.43 km in 300 s is ~5 km/h: every valid vehicle contributes one
        // slow point, the broken file none.
        assert_eq!(points.len(), 3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_batching_is_equivalent_to_one_pass() {
        let dir = scratch_dir("congestion_heatmap_batch_equiv");
        write_fixture_files(&dir);

        let one_batch = collect_slow_points(&config_for(&dir, 100)).unwrap();
        let two_per_batch = collect_slow_points(&config_for(&dir, 2)).unwrap();
        let singletons = collect_slow_points(&config_for(&dir, 1)).unwrap();

        assert_eq!(point_set(&one_batch), point_set(&two_per_batch));
        assert_eq!(point_set(&one_batch), point_set(&singletons));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_is_fatal() {
        let dir = scratch_dir("congestion_heatmap_batch_empty");

        assert!(collect_slow_points(&config_for(&dir, 10)).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
