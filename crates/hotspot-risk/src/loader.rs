//! Incident record loading from JSON files
//!
//! Input is a JSON array of flat objects. `latitude` / `longitude` are
//! required, `occurred_at` is optional, every other string field becomes a
//! categorical attribute and every other numeric field a feature.
//!
//! Unusable rows are skipped and counted, never fatal.

use crate::{check_coordinates, IncidentRecord, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coordinate as exported by spreadsheets: a number, or text that may use a
/// decimal comma ("-2,19")
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCoordinate {
    Number(f64),
    Text(String),
}

impl RawCoordinate {
    fn parse(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().replace(',', ".").parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    latitude: Option<RawCoordinate>,
    longitude: Option<RawCoordinate>,
    occurred_at: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Per-file ingestion counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub total: usize,
    pub loaded: usize,
    pub missing_coordinates: usize,
    pub unparsable_coordinates: usize,
    /// (0, 0) placeholder rows
    pub zero_coordinates: usize,
    pub out_of_range: usize,
    pub bad_timestamps: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.total - self.loaded
    }
}

enum Skip {
    Missing,
    Unparsable,
    Zero,
    OutOfRange(String),
    BadTimestamp(String),
}

/// `YYYY-MM-DD HH:MM:SS` or RFC 3339 (wall-clock time kept)
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|t| t.naive_local()))
}

/// Trimmed, upper-cased categorical value; `None` when blank
pub fn normalize_category(raw: &str) -> Option<String> {
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_uppercase())
}

fn convert(raw: RawRecord) -> std::result::Result<IncidentRecord, Skip> {
    let (lat, lon) = match (&raw.latitude, &raw.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(Skip::Missing),
    };
    let (latitude, longitude) = match (lat.parse(), lon.parse()) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(Skip::Unparsable),
    };
    if latitude == 0.0 && longitude == 0.0 {
        return Err(Skip::Zero);
    }
    check_coordinates(latitude, longitude).map_err(Skip::OutOfRange)?;

    let mut record = IncidentRecord::new(latitude, longitude);
    if let Some(ts) = raw.occurred_at.as_deref().filter(|s| !s.trim().is_empty()) {
        let parsed = parse_timestamp(ts).ok_or_else(|| Skip::BadTimestamp(ts.to_string()))?;
        record = record.at(parsed);
    }

    for (name, value) in raw.extra {
        match value {
            Value::String(s) => {
                if let Some(v) = normalize_category(&s) {
                    record.attributes.insert(name, v);
                }
            }
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    record.features.insert(name, v);
                }
            }
            _ => {}
        }
    }
    Ok(record)
}

/// Parse records from any reader
pub fn records_from_reader(reader: impl Read) -> Result<(Vec<IncidentRecord>, LoadReport)> {
    let raw: Vec<RawRecord> = serde_json::from_reader(reader)?;
    let mut report = LoadReport {
        total: raw.len(),
        ..LoadReport::default()
    };

    let mut records = Vec::with_capacity(raw.len());
    for (i, row) in raw.into_iter().enumerate() {
        match convert(row) {
            Ok(record) => records.push(record),
            Err(Skip::Missing) => report.missing_coordinates += 1,
            Err(Skip::Unparsable) => report.unparsable_coordinates += 1,
            Err(Skip::Zero) => report.zero_coordinates += 1,
            Err(Skip::OutOfRange(reason)) => {
                debug!("Skipping record {}: {}", i, reason);
                report.out_of_range += 1;
            }
            Err(Skip::BadTimestamp(ts)) => {
                debug!("Skipping record {}: unparsable timestamp {:?}", i, ts);
                report.bad_timestamps += 1;
            }
        }
    }
    report.loaded = records.len();

    if report.skipped() > 0 {
        warn!(
            "Skipped {} of {} records (missing={}, unparsable={}, zero={}, out_of_range={}, bad_timestamp={})",
            report.skipped(),
            report.total,
            report.missing_coordinates,
            report.unparsable_coordinates,
            report.zero_coordinates,
            report.out_of_range,
            report.bad_timestamps
        );
    }
    Ok((records, report))
}

/// Load incident records from a JSON file
pub fn load_records(path: impl AsRef<Path>) -> Result<(Vec<IncidentRecord>, LoadReport)> {
    let path = path.as_ref();
    info!("Loading incident records from {:?}", path);

    let file = File::open(path)?;
    let (records, report) = records_from_reader(BufReader::new(file))?;

    info!("Loaded {} records ({} skipped)", report.loaded, report.skipped());
    Ok((records, report))
}
