//! Trace-file enumeration and typed ingestion.
//!
//! One input file per vehicle: headerless CSV with four columns in fixed
//! order (`entity_id,timestamp,longitude,latitude`). A file either yields a
//! fully typed record batch or an error the caller turns into a skip
//! decision; there is no partial load.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Timestamp layout used by the trace files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single position report as read from a trace file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReport {
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub longitude: f64,
    pub latitude: f64,
}

/// Lists all `*.txt` trace files under `data_dir`, sorted by path.
///
/// Sorting keeps batch composition (and therefore the log output) stable
/// across runs; the slow-point result itself is order-independent.
pub fn enumerate_trace_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(data_dir)
        .with_context(|| format!("reading data directory {}", data_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads one trace file into typed [`RawReport`] records.
///
/// # Errors
///
/// Returns an error for an empty file, a row with the wrong column count,
/// a non-numeric coordinate, a non-finite coordinate, or an unparseable
/// timestamp. Callers skip the whole file on any of these.
pub fn read_trace_file(path: &Path) -> Result<Vec<RawReport>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut reports = Vec::new();
    for row in reader.deserialize() {
        let (entity_id, timestamp, longitude, latitude): (String, String, f64, f64) =
            row.with_context(|| format!("malformed row in {}", path.display()))?;

        let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
            .with_context(|| format!("bad timestamp {timestamp:?} in {}", path.display()))?;

        if !longitude.is_finite() || !latitude.is_finite() {
            bail!("non-finite coordinates in {}", path.display());
        }

        reports.push(RawReport {
            entity_id,
            timestamp,
            longitude,
            latitude,
        });
    }

    if reports.is_empty() {
        bail!("empty trace file {}", path.display());
    }

    Ok(reports)
}
