//! Time-bucket partitioning of slow points into rendered frames.
//!
//! Re-walks the `[start, end)` range computed by the range pass, hands each
//! bucket's subset to the renderer, and tracks which buckets actually
//! produced an image. Frame names embed a zero-padded bucket sequence
//! number and the bucket's wall-clock bounds so downstream tools can sort
//! frames without metadata; a JSON index of the generated frames is written
//! alongside them anyway.

use crate::config::Config;
use crate::density::{self, GlobalDensity};
use crate::render::FrameRenderer;
use crate::speed::SlowPoint;
use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{error, info, warn};

/// One generated frame in the index.
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub seq: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub points: usize,
    pub file: String,
}

/// Index of all generated frames, written as `frames_index.json`.
#[derive(Debug, Serialize)]
pub struct FrameIndex {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub interval_hours: u32,
    pub frames: Vec<FrameRecord>,
}

/// Deterministic frame name: zero-padded bucket sequence plus the bucket's
/// start and end times.
pub fn frame_filename(seq: usize, start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!(
        "heatmap_{seq:04}_{}_to_{}.png",
        start.format("%Y%m%d_%H%M"),
        end.format("%H%M")
    )
}

/// Render pass: walks every bucket, renders its subset under the global
/// density range, and returns how many frames were actually generated.
///
/// The sequence counter advances for every bucket, generated or not, so
/// frame numbers encode bucket positions in the walk. A failing bucket is
/// logged and skipped; it never aborts the pass.
pub fn render_frames<R: FrameRenderer>(
    points: &[SlowPoint],
    global: &GlobalDensity,
    config: &Config,
    renderer: &R,
) -> Result<usize> {
    let walk = density::buckets(global.start, global.end, config.time_interval_hours);
    info!(intervals = walk.len(), "Starting render pass");

    let mut records = Vec::new();
    let mut generated = 0usize;

    for (seq, (bucket_start, bucket_end)) in walk.into_iter().enumerate() {
        let subset: Vec<SlowPoint> = points
            .iter()
            .filter(|p| p.timestamp >= bucket_start && p.timestamp < bucket_end)
            .cloned()
            .collect();

        let filename = frame_filename(seq, bucket_start, bucket_end);
        let output_path = config.output_dir.join(&filename);

        match renderer.render(&subset, &output_path, &config.map_bounds, &global.range) {
            Ok(true) => {
                generated += 1;
                records.push(FrameRecord {
                    seq,
                    start: bucket_start,
                    end: bucket_end,
                    points: subset.len(),
                    file: filename,
                });
            }
            Ok(false) => {}
            Err(e) => {
                error!(frame = %filename, error = %e, "Frame render failed, skipping bucket");
            }
        }
    }

    write_index(
        &config.output_dir.join("frames_index.json"),
        FrameIndex {
            generated_at: chrono::Utc::now(),
            interval_hours: config.time_interval_hours,
            frames: records,
        },
    );

    info!(generated, "Render pass complete");
    Ok(generated)
}

/// Best-effort: the index is a convenience for downstream tools, so a write
/// failure is logged, not escalated.
fn write_index(path: &Path, index: FrameIndex) {
    let result = File::create(path)
        .map_err(anyhow::Error::from)
        .and_then(|f| serde_json::to_writer_pretty(f, &index).map_err(anyhow::Error::from));
    if let Err(e) = result {
        warn!(index = %path.display(), error = %e, "Failed to write frame index");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapBounds;
    use crate::density::DensityRange;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::env;
    use std::fs;

    /// Test double: records every bucket it sees, "generates" a frame when
    /// the bucket has at least `min_points` points, writes nothing.
    struct RecordingRenderer {
        min_points: usize,
        calls: RefCell<Vec<(String, usize)>>,
    }

    impl RecordingRenderer {
        fn new(min_points: usize) -> Self {
            Self {
                min_points,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl FrameRenderer for RecordingRenderer {
        fn render(
            &self,
            points: &[SlowPoint],
            output_path: &Path,
            _bounds: &MapBounds,
            _range: &DensityRange,
        ) -> Result<bool> {
            let name = output_path
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .to_string();
            self.calls.borrow_mut().push((name, points.len()));
            Ok(points.len() >= self.min_points)
        }
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2008, 2, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn point(t: NaiveDateTime) -> SlowPoint {
        SlowPoint {
            timestamp: t,
            longitude: 116.3,
            latitude: 39.9,
        }
    }

    fn scratch_config(name: &str) -> Config {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Config {
            output_dir: dir,
            ..Config::default()
        }
    }

    #[test]
    fn test_frame_filename_format() {
        let name = frame_filename(3, ts(13, 0), ts(14, 0));
        assert_eq!(name, "heatmap_0003_20080202_1300_to_1400.png");
    }

    #[test]
    fn test_sequence_counter_advances_past_suppressed_buckets() {
        let config = scratch_config("congestion_heatmap_frames_seq");
        let global = GlobalDensity {
            range: DensityRange {
                min: 1.0,
                max: 10.0,
            },
            start: ts(13, 0),
            end: ts(16, 0),
        };
        // Bucket 0 is dense, bucket 1 is empty, bucket 2 is dense again.
        let mut points: Vec<_> = (0..6).map(|i| point(ts(13, i * 5))).collect();
        points.extend((0..6).map(|i| point(ts(15, i * 5))));

        let renderer = RecordingRenderer::new(5);
        let generated = render_frames(&points, &global, &config, &renderer).unwrap();

        assert_eq!(generated, 2);
        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].0.starts_with("heatmap_0000_"));
        assert!(calls[1].0.starts_with("heatmap_0001_"));
        // The empty middle bucket still consumed sequence number 1.
        assert_eq!(calls[2].0, "heatmap_0002_20080202_1500_to_1600.png");

        fs::remove_dir_all(&config.output_dir).unwrap();
    }

    #[test]
    fn test_bucket_selection_is_half_open() {
        let config = scratch_config("congestion_heatmap_frames_halfopen");
        let global = GlobalDensity {
            range: DensityRange {
                min: 1.0,
                max: 10.0,
            },
            start: ts(13, 0),
            end: ts(15, 0),
        };
        // A point exactly on a bucket boundary belongs to the later bucket.
        let points = vec![
            point(ts(13, 0)),
            point(ts(13, 59)),
            point(ts(14, 0)),
        ];

        let renderer = RecordingRenderer::new(1);
        render_frames(&points, &global, &config, &renderer).unwrap();

        let calls = renderer.calls.borrow();
        assert_eq!(calls[0].1, 2);
        assert_eq!(calls[1].1, 1);

        fs::remove_dir_all(&config.output_dir).unwrap();
    }

    #[test]
    fn test_index_lists_only_generated_frames() {
        let config = scratch_config("congestion_heatmap_frames_index");
        let global = GlobalDensity {
            range: DensityRange {
                min: 1.0,
                max: 10.0,
            },
            start: ts(13, 0),
            end: ts(15, 0),
        };
        let points: Vec<_> = (0..6).map(|i| point(ts(13, i * 5))).collect();

        let renderer = RecordingRenderer::new(5);
        render_frames(&points, &global, &config, &renderer).unwrap();

        let raw = fs::read_to_string(config.output_dir.join("frames_index.json")).unwrap();
        let index: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let frames = index["frames"].as_array().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["seq"], 0);
        assert_eq!(frames[0]["points"], 6);

        fs::remove_dir_all(&config.output_dir).unwrap();
    }
}
