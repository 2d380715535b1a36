//! Dataset presets and the geographic pre-filter

use crate::dbscan::ClusterParams;
use crate::profile::ProfileSchema;
use crate::{HotspotError, IncidentRecord, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Inclusive latitude/longitude box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Continental Ecuador (Galápagos excluded)
    pub const ECUADOR_MAINLAND: Self = Self {
        min_latitude: -6.0,
        max_latitude: 2.0,
        min_longitude: -82.0,
        max_longitude: -74.0,
    };

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }

    /// Keep the records that fall inside the box
    pub fn filter(&self, records: Vec<IncidentRecord>) -> Vec<IncidentRecord> {
        let total = records.len();
        let kept: Vec<IncidentRecord> = records
            .into_iter()
            .filter(|r| self.contains(r.latitude, r.longitude))
            .collect();
        info!(
            "Bounding box kept {}/{} records ({} outside)",
            kept.len(),
            total,
            total - kept.len()
        );
        kept
    }
}

/// Known incident datasets and their clustering defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetPreset {
    /// Police detentions: dense, street-level hotspots
    Detentions,
    /// Emergency-call events: larger neighborhoods, more samples
    EmergencyCalls,
}

impl DatasetPreset {
    pub fn radius_km(&self) -> f64 {
        match self {
            Self::Detentions => 0.5,
            Self::EmergencyCalls => 1.0,
        }
    }

    pub fn min_samples(&self) -> usize {
        match self {
            Self::Detentions => 10,
            Self::EmergencyCalls => 30,
        }
    }

    pub fn params(&self) -> ClusterParams {
        ClusterParams {
            eps: crate::haversine::km_to_angular(self.radius_km()),
            min_samples: self.min_samples(),
        }
    }

    pub fn schema(&self) -> ProfileSchema {
        match self {
            Self::Detentions => ProfileSchema::new(&["offense", "canton"], &[]),
            Self::EmergencyCalls => ProfileSchema::new(&["event_type", "canton"], &[]),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::ECUADOR_MAINLAND
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Detentions => "detentions",
            Self::EmergencyCalls => "emergency-calls",
        }
    }
}

impl fmt::Display for DatasetPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetPreset {
    type Err = HotspotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "detentions" => Ok(Self::Detentions),
            "emergency-calls" | "ecu911" => Ok(Self::EmergencyCalls),
            other => Err(HotspotError::InvalidParameter {
                param: "dataset",
                reason: format!("unknown dataset {:?} (expected detentions or emergency-calls)", other),
            }),
        }
    }
}
