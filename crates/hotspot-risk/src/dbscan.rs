//! Haversine DBSCAN
//!
//! Density-based clustering over degree coordinates:
//!
//! 1. Neighborhood of every point = all points within `eps` (inclusive,
//!    the point itself counts). Computed with a ball tree, in parallel.
//! 2. Points with `|neighborhood| >= min_samples` are core points.
//! 3. Clusters grow from unlabeled core points in input order with a BFS work
//!    queue: every neighbor of a core point joins, and only core neighbors
//!    are expanded further. Non-core members are border points.
//! 4. Points never reached stay noise ([`NOISE`]).
//!
//! Neighborhoods are visited in ascending index order, so labels are a pure
//! function of the input order. Across different input orders only the
//! partition is stable; compare with [`ClusterAssignment::partition`].

use crate::balltree::{BallTree, DEFAULT_LEAF_SIZE};
use crate::haversine::{km_to_angular, to_km, RadPoint};
use crate::{validate_points, ClusterLabel, GeoPoint, HotspotError, Result, NOISE};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// DBSCAN parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Neighborhood radius as an angular distance (radians)
    pub eps: f64,
    /// Minimum neighborhood size for a core point, the point included
    pub min_samples: usize,
}

impl ClusterParams {
    pub fn new(eps: f64, min_samples: usize) -> Result<Self> {
        let params = Self { eps, min_samples };
        params.validate()?;
        Ok(params)
    }

    /// Radius in km, converted with the Earth mean radius
    pub fn from_km(radius_km: f64, min_samples: usize) -> Result<Self> {
        Self::new(km_to_angular(radius_km), min_samples)
    }

    pub fn radius_km(&self) -> f64 {
        to_km(self.eps)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(HotspotError::InvalidParameter {
                param: "eps",
                reason: format!("requires finite eps > 0, got {}", self.eps),
            });
        }
        if self.min_samples < 1 {
            return Err(HotspotError::InvalidParameter {
                param: "min_samples",
                reason: format!("requires min_samples >= 1, got {}", self.min_samples),
            });
        }
        Ok(())
    }
}

/// Label per input point plus core-point bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    /// One label per input point, [`NOISE`] for noise
    pub labels: Vec<ClusterLabel>,
    /// Input indices of core points, ascending
    pub core_sample_indices: Vec<usize>,
    pub n_clusters: usize,
}

impl ClusterAssignment {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    /// Input indices carrying `label`
    pub fn members(&self, label: ClusterLabel) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Cluster sizes keyed by label (noise excluded)
    pub fn cluster_sizes(&self) -> BTreeMap<ClusterLabel, usize> {
        let mut sizes = BTreeMap::new();
        for &l in self.labels.iter().filter(|&&l| l != NOISE) {
            *sizes.entry(l).or_insert(0) += 1;
        }
        sizes
    }

    /// Clusters as sets of input indices, independent of label numbering.
    ///
    /// Each set is sorted and the sets are ordered by their first member.
    pub fn partition(&self) -> Vec<Vec<usize>> {
        let mut by_label: BTreeMap<ClusterLabel, Vec<usize>> = BTreeMap::new();
        for (i, &l) in self.labels.iter().enumerate() {
            if l != NOISE {
                by_label.entry(l).or_default().push(i);
            }
        }
        let mut sets: Vec<Vec<usize>> = by_label.into_values().collect();
        sets.sort_by_key(|s| s[0]);
        sets
    }
}

/// A core point as stored in the fitted model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorePoint {
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    pub label: ClusterLabel,
}

impl CorePoint {
    pub fn coords(&self) -> RadPoint {
        [self.latitude_rad, self.longitude_rad]
    }
}

/// Trained clustering state needed for inference.
///
/// Core coordinates are kept exactly as used during the fit (radians) and are
/// never re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedClusterModel {
    pub eps: f64,
    pub min_samples: usize,
    pub core_points: Vec<CorePoint>,
}

impl FittedClusterModel {
    pub fn params(&self) -> ClusterParams {
        ClusterParams {
            eps: self.eps,
            min_samples: self.min_samples,
        }
    }

    pub fn core_coords(&self) -> Vec<RadPoint> {
        self.core_points.iter().map(CorePoint::coords).collect()
    }

    /// Distinct labels present among core points
    pub fn cluster_labels(&self) -> BTreeSet<ClusterLabel> {
        self.core_points.iter().map(|c| c.label).collect()
    }
}

/// Output of a fit: per-point labels and the model for lookup
#[derive(Debug, Clone)]
pub struct ClusterFit {
    pub assignment: ClusterAssignment,
    pub model: FittedClusterModel,
}

/// Spatial cluster builder
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    params: ClusterParams,
    leaf_size: usize,
}

impl ClusterBuilder {
    pub fn new(params: ClusterParams) -> Self {
        Self {
            params,
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }

    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    pub fn params(&self) -> ClusterParams {
        self.params
    }

    /// Cluster `points` (degrees). The input is not modified.
    pub fn fit(&self, points: &[GeoPoint]) -> Result<ClusterFit> {
        self.params.validate()?;
        if points.is_empty() {
            return Err(HotspotError::InvalidParameter {
                param: "points",
                reason: "fit requires at least 1 point".to_string(),
            });
        }
        validate_points(points)?;

        let ClusterParams { eps, min_samples } = self.params;
        info!(
            "DBSCAN over {} points (eps={:.9} rad / {:.3} km, min_samples={})",
            points.len(),
            eps,
            to_km(eps),
            min_samples
        );

        let coords: Vec<RadPoint> = points.iter().map(GeoPoint::to_radians).collect();
        let tree = BallTree::with_leaf_size(coords.clone(), self.leaf_size);
        let neighborhoods = tree.query_radius_many(&coords, eps);
        debug!(
            "Neighborhoods computed ({} tree nodes, {} neighbor pairs)",
            tree.node_count(),
            neighborhoods.par_iter().map(Vec::len).sum::<usize>()
        );

        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|n| n.len() >= min_samples)
            .collect();
        let (labels, n_clusters) = propagate_labels(&neighborhoods, &is_core);

        let core_sample_indices: Vec<usize> = (0..coords.len()).filter(|&i| is_core[i]).collect();
        let core_points = core_sample_indices
            .iter()
            .map(|&i| CorePoint {
                latitude_rad: coords[i][0],
                longitude_rad: coords[i][1],
                label: labels[i],
            })
            .collect();

        let assignment = ClusterAssignment {
            labels,
            core_sample_indices,
            n_clusters,
        };
        info!(
            "Found {} clusters ({} core points, {} noise points)",
            n_clusters,
            assignment.core_sample_indices.len(),
            assignment.noise_count()
        );

        Ok(ClusterFit {
            assignment,
            model: FittedClusterModel {
                eps,
                min_samples,
                core_points,
            },
        })
    }
}

/// Fit with explicit parameters
pub fn fit(points: &[GeoPoint], eps: f64, min_samples: usize) -> Result<ClusterFit> {
    ClusterBuilder::new(ClusterParams::new(eps, min_samples)?).fit(points)
}

/// Expand clusters from core seeds in index order.
///
/// A point is labeled when it is first reached, so a border point shared by
/// two clusters belongs to the one discovered first.
fn propagate_labels(neighborhoods: &[Vec<usize>], is_core: &[bool]) -> (Vec<ClusterLabel>, usize) {
    let mut labels = vec![NOISE; neighborhoods.len()];
    let mut queue = VecDeque::new();
    let mut next_label: ClusterLabel = 0;

    for seed in 0..neighborhoods.len() {
        if labels[seed] != NOISE || !is_core[seed] {
            continue;
        }

        labels[seed] = next_label;
        queue.push_back(seed);

        // Only core points are queued
        while let Some(p) = queue.pop_front() {
            for &q in &neighborhoods[p] {
                if labels[q] == NOISE {
                    labels[q] = next_label;
                    if is_core[q] {
                        queue.push_back(q);
                    }
                }
            }
        }

        next_label += 1;
    }

    (labels, next_label as usize)
}


#[cfg(test)]
mod tests {
    use super::test_support::{blob, offset};
    use super::*;
    use crate::haversine::haversine;

    const GUAYAQUIL: GeoPoint = GeoPoint {
        latitude: -2.19,
        longitude: -79.89,
    };
    const QUITO: GeoPoint = GeoPoint {
        latitude: -0.18,
        longitude: -78.47,
    };

    fn km_params(km: f64, min_samples: usize) -> ClusterParams {
        ClusterParams::from_km(km, min_samples).unwrap()
    }

    #[test]
    fn test_invalid_parameters() {
        let points = blob(GUAYAQUIL, 5, 10.0);
        for (eps, min_samples, param) in [
            (0.0, 5, "eps"),
            (-1.0, 5, "eps"),
            (f64::NAN, 5, "eps"),
            (f64::INFINITY, 5, "eps"),
            (0.001, 0, "min_samples"),
        ] {
            match fit(&points, eps, min_samples) {
                Err(HotspotError::InvalidParameter { param: p, .. }) => assert_eq!(p, param),
                other => panic!("expected InvalidParameter({}), got {:?}", param, other),
            }
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let builder = ClusterBuilder::new(km_params(0.1, 2));
        match builder.fit(&[]) {
            Err(HotspotError::InvalidParameter { param, .. }) => assert_eq!(param, "points"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_point_rejects_batch() {
        let mut points = blob(GUAYAQUIL, 5, 10.0);
        points.push(GeoPoint::new(-95.0, -79.0));
        match fit(&points, 0.001, 2) {
            Err(HotspotError::MalformedRecord { index, .. }) => assert_eq!(index, 5),
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_two_clusters_and_noise() {
        let mut points = blob(GUAYAQUIL, 12, 30.0);
        points.extend(blob(QUITO, 12, 30.0));
        points.push(GeoPoint::new(-1.0, -80.0));

        let result = ClusterBuilder::new(km_params(0.1, 5)).fit(&points).unwrap();
        let a = &result.assignment;
        assert_eq!(a.n_clusters, 2);
        assert_eq!(a.labels[0], 0);
        assert_eq!(a.labels[12], 1);
        assert!(a.labels[..12].iter().all(|&l| l == 0));
        assert!(a.labels[12..24].iter().all(|&l| l == 1));
        assert_eq!(a.labels[24], NOISE);
        assert_eq!(a.noise_count(), 1);
        assert_eq!(a.core_sample_indices.len(), 24);
        assert_eq!(result.model.core_points.len(), 24);
        assert_eq!(result.model.cluster_labels().len(), 2);
    }

    #[test]
    fn test_border_point_joins_but_does_not_expand() {
        // Five core points on a 4 m line, a border point 99.5 m from the last
        // of them and a lone point 80 m past the border. With eps=100 m and
        // min_samples=5 the border has 2 neighbors and must not pull the lone
        // point in.
        let mut points: Vec<GeoPoint> = (0..5).map(|i| offset(GUAYAQUIL, 0.0, i as f64)).collect();
        points.push(offset(GUAYAQUIL, 0.0, 103.5));
        points.push(offset(GUAYAQUIL, 0.0, 183.5));

        let result = fit(&points, km_to_angular(0.1), 5).unwrap();
        let a = &result.assignment;
        assert_eq!(a.n_clusters, 1);
        assert_eq!(a.core_sample_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(a.labels[5], 0, "border point joins the cluster");
        assert_eq!(a.labels[6], NOISE, "border point does not propagate");
    }

    #[test]
    fn test_min_samples_one_makes_every_point_core() {
        let points = vec![GUAYAQUIL, QUITO];
        let result = fit(&points, km_to_angular(1.0), 1).unwrap();
        assert_eq!(result.assignment.labels, vec![0, 1]);
        assert_eq!(result.assignment.core_sample_indices, vec![0, 1]);
    }

    #[test]
    fn test_eps_boundary_inclusive() {
        let a = GUAYAQUIL;
        let b = offset(GUAYAQUIL, 40.0, 70.0);
        let eps = haversine(a.to_radians(), b.to_radians());

        let hit = fit(&[a, b], eps, 2).unwrap();
        assert_eq!(hit.assignment.labels, vec![0, 0]);

        let below = f64::from_bits(eps.to_bits() - 1);
        let miss = fit(&[a, b], below, 2).unwrap();
        assert_eq!(miss.assignment.labels, vec![NOISE, NOISE]);
    }

    #[test]
    fn test_core_points_keep_fit_coordinates() {
        let points = blob(GUAYAQUIL, 6, 20.0);
        let result = fit(&points, km_to_angular(0.1), 3).unwrap();
        for (core, &i) in result
            .model
            .core_points
            .iter()
            .zip(&result.assignment.core_sample_indices)
        {
            assert_eq!(core.coords(), points[i].to_radians());
            assert_eq!(core.label, result.assignment.labels[i]);
        }
    }

    #[test]
    fn test_partition_stable_under_reordering() {
        let mut points = blob(GUAYAQUIL, 10, 30.0);
        points.extend(blob(QUITO, 10, 30.0));
        let forward = fit(&points, km_to_angular(0.1), 4).unwrap().assignment;

        let reversed: Vec<GeoPoint> = points.iter().rev().copied().collect();
        let backward = fit(&reversed, km_to_angular(0.1), 4).unwrap().assignment;

        // Labels swap, the partition does not
        let n = points.len();
        assert_eq!(forward.labels[0], 0);
        assert_eq!(backward.labels[n - 1], 1);
        let mut remapped: Vec<Vec<usize>> = backward
            .partition()
            .into_iter()
            .map(|set| {
                let mut s: Vec<usize> = set.into_iter().map(|i| n - 1 - i).collect();
                s.sort_unstable();
                s
            })
            .collect();
        remapped.sort_by_key(|s| s[0]);
        assert_eq!(forward.partition(), remapped);
    }

    #[test]
    fn test_refit_is_identical() {
        let mut points = blob(GUAYAQUIL, 15, 40.0);
        points.extend(blob(QUITO, 15, 40.0));
        let params = km_params(0.1, 10);
        let first = ClusterBuilder::new(params).fit(&points).unwrap();
        let second = ClusterBuilder::new(params).with_leaf_size(3).fit(&points).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.model, second.model);
    }

    #[test]
    fn test_cluster_sizes_and_members() {
        let mut points = blob(GUAYAQUIL, 7, 20.0);
        points.extend(blob(QUITO, 9, 20.0));
        let a = fit(&points, km_to_angular(0.1), 3).unwrap().assignment;
        let sizes = a.cluster_sizes();
        assert_eq!(sizes.get(&0), Some(&7));
        assert_eq!(sizes.get(&1), Some(&9));
        assert_eq!(a.members(1), (7..16).collect::<Vec<_>>());
    }
}

// ============================================================================
// Property-based Tests
// ============================================================================
