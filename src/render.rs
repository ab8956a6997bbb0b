//! Raster rendering of per-bucket density frames.
//!
//! The partitioner talks to a [`FrameRenderer`] trait; the production
//! implementation bins a bucket's points into a fixed grid and paints each
//! occupied bin under the global log-scale range with a black-body colormap
//! (black through red and yellow to white).

use crate::config::MapBounds;
use crate::density::{DensityRange, Histogram2d};
use crate::speed::SlowPoint;
use anyhow::{Context, Result};
use plotters::prelude::*;
use std::path::Path;
use tracing::debug;

/// Grid resolution of rendered frames. Deliberately finer than the 250-bin
/// grid of the range-estimation pass.
pub const RENDER_BINS: usize = 750;

/// Buckets with fewer points than this produce no frame at all.
const MIN_POINTS_PER_FRAME: usize = 5;

/// Renders one time bucket's point subset to an image file.
///
/// Returns `Ok(false)` when the bucket is suppressed (too few points to be
/// worth a frame); the file is not created in that case.
pub trait FrameRenderer {
    fn render(
        &self,
        points: &[SlowPoint],
        output_path: &Path,
        bounds: &MapBounds,
        range: &DensityRange,
    ) -> Result<bool>;
}

/// PNG renderer painting one pixel per histogram bin.
pub struct PlottersRenderer {
    bins: usize,
}

impl PlottersRenderer {
    pub fn new() -> Self {
        Self { bins: RENDER_BINS }
    }

    #[cfg(test)]
    fn with_bins(bins: usize) -> Self {
        Self { bins }
    }
}

impl Default for PlottersRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRenderer for PlottersRenderer {
    fn render(
        &self,
        points: &[SlowPoint],
        output_path: &Path,
        bounds: &MapBounds,
        range: &DensityRange,
    ) -> Result<bool> {
        if points.len() < MIN_POINTS_PER_FRAME {
            debug!(
                points = points.len(),
                threshold = MIN_POINTS_PER_FRAME,
                "Too few points for a frame, skipping"
            );
            return Ok(false);
        }

        let mut histogram = Histogram2d::new(self.bins, *bounds);
        for p in points {
            histogram.record(p.longitude, p.latitude);
        }

        let size = self.bins as u32;
        let root = BitMapBackend::new(output_path, (size, size)).into_drawing_area();
        root.fill(&BLACK)
            .with_context(|| format!("filling {}", output_path.display()))?;

        for y in 0..self.bins {
            for x in 0..self.bins {
                let count = histogram.count_at(x, y);
                if count == 0 {
                    continue;
                }
                let (r, g, b) = hot_colormap(log_intensity(count as f64, range));
                // Latitude grows upward, image rows grow downward.
                let py = (self.bins - 1 - y) as i32;
                root.draw_pixel((x as i32, py), &RGBColor(r, g, b))
                    .with_context(|| format!("painting {}", output_path.display()))?;
            }
        }

        root.present()
            .with_context(|| format!("writing {}", output_path.display()))?;
        Ok(true)
    }
}

/// Position of `count` on the global log scale, clamped to [0, 1].
fn log_intensity(count: f64, range: &DensityRange) -> f64 {
    let lo = range.min.ln();
    let hi = range.max.ln();
    ((count.ln() - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Black-body ramp: black -> red -> yellow -> white.
fn hot_colormap(v: f64) -> (u8, u8, u8) {
    let v = v.clamp(0.0, 1.0);

    let r = (v / 0.365).min(1.0);
    let g = if v < 0.365 {
        0.0
    } else {
        ((v - 0.365) / (0.746 - 0.365)).min(1.0)
    };
    let b = if v < 0.746 {
        0.0
    } else {
        (v - 0.746) / (1.0 - 0.746)
    };

    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}
