//! Risk lookup service
//!
//! Maps a new coordinate to the profile of the hotspot owning the nearest
//! core point, provided that core point is within the fit radius. A miss is
//! `Ok(None)`, never an error.
//!
//! [`RiskLookup`] indexes the core points with a [`BallTree`] and is meant to
//! be loaded once and shared (`Arc<RiskLookup>`) between concurrent callers.
//! The free function [`lookup`] is the brute-force form over the same
//! semantics; both pick the lowest core index when distances tie.

use crate::balltree::BallTree;
use crate::dbscan::FittedClusterModel;
use crate::haversine::{distances_to_many, to_km, RadPoint};
use crate::profile::{ClusterProfile, ClusterProfiles};
use crate::{check_coordinates, store, validate_points, ClusterLabel, GeoPoint, HotspotError, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Closest core point to a query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearestCore {
    pub core_index: usize,
    pub label: ClusterLabel,
    pub distance_rad: f64,
    pub distance_km: f64,
}

impl NearestCore {
    fn new(model: &FittedClusterModel, core_index: usize, distance_rad: f64) -> Self {
        Self {
            core_index,
            label: model.core_points[core_index].label,
            distance_rad,
            distance_km: to_km(distance_rad),
        }
    }

    /// Inclusive radius test against the fit radius
    pub fn within(&self, eps: f64) -> bool {
        self.distance_rad <= eps
    }
}

fn query_point(latitude: f64, longitude: f64) -> Result<RadPoint> {
    check_coordinates(latitude, longitude)
        .map_err(|reason| HotspotError::MalformedRecord { index: 0, reason })?;
    Ok(GeoPoint::new(latitude, longitude).to_radians())
}

/// Indexed lookup over an immutable model and profile table
#[derive(Debug)]
pub struct RiskLookup {
    model: FittedClusterModel,
    profiles: ClusterProfiles,
    index: BallTree,
}

impl RiskLookup {
    /// Fails with `CorruptArtifact` when a core label has no profile
    pub fn new(model: FittedClusterModel, profiles: ClusterProfiles) -> Result<Self> {
        store::check_consistency(&model, &profiles)?;
        let index = BallTree::new(model.core_coords());
        debug!(
            "Indexed {} core points ({} tree nodes)",
            index.len(),
            index.node_count()
        );
        Ok(Self {
            model,
            profiles,
            index,
        })
    }

    /// Load both artifacts from a model directory
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let (model, profiles) = store::load(dir)?;
        let service = Self::new(model, profiles)?;
        info!(
            "Risk lookup ready: {} hotspots, {} core points, radius {:.3} km ({:?})",
            service.profiles.len(),
            service.model.core_points.len(),
            to_km(service.model.eps),
            dir
        );
        Ok(service)
    }

    pub fn model(&self) -> &FittedClusterModel {
        &self.model
    }

    pub fn profiles(&self) -> &ClusterProfiles {
        &self.profiles
    }

    pub fn eps(&self) -> f64 {
        self.model.eps
    }

    /// Nearest core point regardless of radius. `Ok(None)` only for a model
    /// without core points.
    pub fn nearest_core(&self, latitude: f64, longitude: f64) -> Result<Option<NearestCore>> {
        let q = query_point(latitude, longitude)?;
        Ok(self
            .index
            .nearest(q)
            .map(|(i, d)| NearestCore::new(&self.model, i, d)))
    }

    pub fn lookup(&self, latitude: f64, longitude: f64) -> Result<Option<&ClusterProfile>> {
        let q = query_point(latitude, longitude)?;
        Ok(self.resolve(q))
    }

    fn resolve(&self, q: RadPoint) -> Option<&ClusterProfile> {
        let (i, d) = self.index.nearest(q)?;
        let nearest = NearestCore::new(&self.model, i, d);
        if !nearest.within(self.model.eps) {
            return None;
        }
        self.profiles.get(nearest.label)
    }

    /// Batch lookup, evaluated in parallel. The whole batch is rejected on
    /// the first malformed point, reported by its position.
    pub fn lookup_many(&self, points: &[GeoPoint]) -> Result<Vec<Option<&ClusterProfile>>> {
        validate_points(points)?;
        Ok(points
            .par_iter()
            .map(|p| self.resolve(p.to_radians()))
            .collect())
    }
}

/// Brute-force lookup: distance to every core point, then the inclusive
/// radius test on the minimum.
pub fn lookup(
    model: &FittedClusterModel,
    profiles: &ClusterProfiles,
    latitude: f64,
    longitude: f64,
) -> Result<Option<ClusterProfile>> {
    let q = query_point(latitude, longitude)?;
    let distances = distances_to_many(q, &model.core_coords());
    let nearest = distances
        .into_iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, best_d)) if d >= best_d => best,
            _ => Some((i, d)),
        });

    let Some((i, d)) = nearest else {
        return Ok(None);
    };
    let nearest = NearestCore::new(model, i, d);
    if !nearest.within(model.eps) || nearest.label < 0 {
        return Ok(None);
    }
    Ok(profiles.get(nearest.label).cloned())
}
