//! Incident Hotspot Risk Library
//!
//! Groups geo-tagged incident records (police detentions, emergency-call events)
//! into spatial hotspots with a haversine-metric DBSCAN, reduces every hotspot
//! to a profile, and maps new coordinates to the nearest historical hotspot.
//!
//! # Pipeline
//!
//! ```text
//! records ──► dbscan::fit ──► profile::summarize ──► store::save
//!                                                        │
//!                         lookup::RiskLookup ◄────── store::load
//! ```
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Distance | [`haversine`] | great-circle distance (radians / km) |
//! | Index | [`balltree`] | radius + nearest queries over radian points |
//! | Clustering | [`dbscan`] | label per record, fitted core-point model |
//! | Aggregation | [`profile`] | dominant values, centroid, temporal means |
//! | Persistence | [`store`] | model + profile JSON artifacts |
//! | Inference | [`lookup`] | nearest hotspot profile or nothing |
//!
//! # Coordinate conventions
//!
//! Records and queries are given in decimal degrees. Everything inside the
//! distance engine, the ball tree and the fitted model is in radians, and the
//! clustering radius `eps` is an angular distance (`km / EARTH_RADIUS_KM`).

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod balltree;
pub mod dataset;
pub mod dbscan;
pub mod export;
pub mod haversine;
pub mod loader;
pub mod lookup;
pub mod pipeline;
pub mod profile;
pub mod store;

pub use dataset::{BoundingBox, DatasetPreset};
pub use dbscan::{
    fit, ClusterAssignment, ClusterBuilder, ClusterFit, ClusterParams, CorePoint, FittedClusterModel,
};
pub use lookup::{lookup, NearestCore, RiskLookup};
pub use pipeline::{FitSummary, HotspotPipeline, PipelineOutput};
pub use profile::{
    summarize, ClusterProfile, ClusterProfiles, ProfileSchema, TimeBlock, TimeBlockShares,
};
pub use store::{ARTIFACT_FORMAT_VERSION, MODEL_FILE_NAME, PROFILES_FILE_NAME};

/// Earth mean radius in km (IUGG), used to turn km radii into angular `eps`
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Cluster label. Non-negative values are dense cluster ids.
pub type ClusterLabel = i64;

/// Label assigned to points that belong to no cluster
pub const NOISE: ClusterLabel = -1;

#[derive(Error, Debug)]
pub enum HotspotError {
    #[error("Invalid parameter `{param}`: {reason}")]
    InvalidParameter { param: &'static str, reason: String },
    #[error("Malformed record at index {index}: {reason}")]
    MalformedRecord { index: usize, reason: String },
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HotspotError>;

/// A geographic sample in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// `[lat, lon]` in radians, the layout used by the distance engine
    pub fn to_radians(&self) -> [f64; 2] {
        haversine::to_radians(self.latitude, self.longitude)
    }
}

/// Check a degree coordinate pair, returning the reason it is unusable
pub fn check_coordinates(latitude: f64, longitude: f64) -> std::result::Result<(), String> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(format!(
            "non-finite coordinates ({}, {})",
            latitude, longitude
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {} outside [-90, 90]", latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {} outside [-180, 180]", longitude));
    }
    Ok(())
}

/// Reject the whole batch on the first unusable coordinate.
///
/// Fit and lookup never compute a distance on invalid input; the loader is
/// the place that skips bad rows.
pub fn validate_points(points: &[GeoPoint]) -> Result<()> {
    for (index, p) in points.iter().enumerate() {
        check_coordinates(p.latitude, p.longitude)
            .map_err(|reason| HotspotError::MalformedRecord { index, reason })?;
    }
    Ok(())
}

/// A cleaned incident record as handed over by the ingestion collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<NaiveDateTime>,
    /// Categorical columns (offense type, canton, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Numeric feature columns
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

impl IncidentRecord {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            occurred_at: None,
            attributes: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }

    pub fn at(mut self, occurred_at: NaiveDateTime) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Hour of day (0-23)
    pub fn hour(&self) -> Option<u32> {
        self.occurred_at.map(|t| t.hour())
    }

    /// Day of week, Monday = 0
    pub fn day_of_week(&self) -> Option<u32> {
        self.occurred_at.map(|t| t.weekday().num_days_from_monday())
    }
}
