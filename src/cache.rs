//! Slow-point result cache.
//!
//! A single fixed-path artifact holding the accumulated slow points so a
//! rerun can skip ingestion entirely. The format is a gzip-framed columnar
//! binary file: a `SLPC` magic, a format version, the point count, then
//! three contiguous little-endian columns (i64 epoch-second timestamps,
//! f64 longitudes, f64 latitudes).
//!
//! The cache is strictly best-effort. A load failure of any kind deletes
//! the stale artifact and reports "absent" so the caller recomputes; a save
//! failure is logged and swallowed.

use crate::speed::SlowPoint;
use anyhow::{Context, Result, bail};
use chrono::DateTime;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{info, warn};

const MAGIC: [u8; 4] = *b"SLPC";
const FORMAT_VERSION: u32 = 1;

/// Loads the cached slow points, or `None` when the artifact is missing or
/// unusable. A corrupt or schema-mismatched artifact is deleted on the way
/// out so the next run is never blocked by it.
pub fn load(path: &Path) -> Option<Vec<SlowPoint>> {
    if !path.exists() {
        return None;
    }

    match read_artifact(path) {
        Ok(points) => {
            info!(points = points.len(), cache = %path.display(), "Loaded slow points from cache");
            Some(points)
        }
        Err(e) => {
            warn!(cache = %path.display(), error = %e, "Discarding unreadable cache artifact");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(cache = %path.display(), error = %e, "Failed to delete stale cache artifact");
            }
            None
        }
    }
}

/// Persists the slow points to `path`. A no-op for an empty collection;
/// never fails the caller, since the run does not depend on the cache.
pub fn save(path: &Path, points: &[SlowPoint]) {
    if points.is_empty() {
        return;
    }

    match write_artifact(path, points) {
        Ok(()) => {
            info!(points = points.len(), cache = %path.display(), "Saved slow points to cache")
        }
        Err(e) => warn!(cache = %path.display(), error = %e, "Cache write failed, continuing"),
    }
}

fn read_artifact(path: &Path) -> Result<Vec<SlowPoint>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(GzDecoder::new(file));

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).context("reading magic")?;
    if magic != MAGIC {
        bail!("bad magic {magic:?}");
    }

    let version = read_u32(&mut reader).context("reading version")?;
    if version != FORMAT_VERSION {
        bail!("unsupported cache format version {version}");
    }

    let count = read_u64(&mut reader).context("reading point count")? as usize;

    let mut timestamps = Vec::with_capacity(count);
    for _ in 0..count {
        let secs = read_i64(&mut reader).context("reading timestamp column")?;
        let ts = DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .with_context(|| format!("timestamp {secs} out of range"))?;
        timestamps.push(ts);
    }

    let mut longitudes = Vec::with_capacity(count);
    for _ in 0..count {
        longitudes.push(read_f64(&mut reader).context("reading longitude column")?);
    }

    let mut latitudes = Vec::with_capacity(count);
    for _ in 0..count {
        latitudes.push(read_f64(&mut reader).context("reading latitude column")?);
    }

    Ok(timestamps
        .into_iter()
        .zip(longitudes)
        .zip(latitudes)
        .map(|((timestamp, longitude), latitude)| SlowPoint {
            timestamp,
            longitude,
            latitude,
        })
        .collect())
}

fn write_artifact(path: &Path, points: &[SlowPoint]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));

    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(points.len() as u64).to_le_bytes())?;

    // Timestamps are truncated to whole seconds, the precision of the input
    // format.
    for p in points {
        writer.write_all(&p.timestamp.and_utc().timestamp().to_le_bytes())?;
    }
    for p in points {
        writer.write_all(&p.longitude.to_le_bytes())?;
    }
    for p in points {
        writer.write_all(&p.latitude.to_le_bytes())?;
    }

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let mut file = encoder.finish().context("finishing gzip stream")?;
    file.flush()?;
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(reader: &mut impl Read) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64(reader: &mut impl Read) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
