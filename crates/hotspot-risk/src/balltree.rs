//! Ball tree over radian points with the haversine metric.
//!
//! Nested balls (center + covering radius) let radius and nearest queries
//! skip whole subtrees: a ball whose center is farther than
//! `radius + ball.radius` from the query cannot contain a hit. This holds for
//! any center because great-circle distance is a metric, so centers are just
//! the coordinate mean of the ball's points.
//!
//! Query answers are identical to brute force over the same points:
//! - [`BallTree::query_radius`] uses the inclusive `<=` test and returns
//!   indices in ascending order;
//! - [`BallTree::nearest`] breaks distance ties by lowest index.

use crate::haversine::{haversine, RadPoint};
use rayon::prelude::*;

/// Maximum number of points per leaf node
pub const DEFAULT_LEAF_SIZE: usize = 40;

/// Pruning bound slack in radians (~6 µm). Keeps float rounding in the
/// center distance from discarding a ball holding a point exactly on the
/// query radius.
const PRUNE_SLACK: f64 = 1e-12;

#[derive(Debug, Clone)]
struct Node {
    center: RadPoint,
    radius: f64,
    /// Range into `order`
    start: usize,
    end: usize,
    children: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct BallTree {
    points: Vec<RadPoint>,
    /// Point indices, permuted so each node owns a contiguous range
    order: Vec<usize>,
    nodes: Vec<Node>,
    leaf_size: usize,
}

impl BallTree {
    pub fn new(points: Vec<RadPoint>) -> Self {
        Self::with_leaf_size(points, DEFAULT_LEAF_SIZE)
    }

    pub fn with_leaf_size(points: Vec<RadPoint>, leaf_size: usize) -> Self {
        let n = points.len();
        let mut tree = Self {
            points,
            order: (0..n).collect(),
            nodes: Vec::new(),
            leaf_size: leaf_size.max(1),
        };
        if n > 0 {
            tree.build(0, n);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[RadPoint] {
        &self.points
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn build(&mut self, start: usize, end: usize) -> usize {
        let (center, radius) = self.bounding_ball(start, end);
        let id = self.nodes.len();
        self.nodes.push(Node {
            center,
            radius,
            start,
            end,
            children: None,
        });

        if end - start > self.leaf_size {
            let dim = self.split_dimension(start, end);
            let mid = start + (end - start) / 2;
            let points = &self.points;
            self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
                points[a][dim].total_cmp(&points[b][dim])
            });
            let left = self.build(start, mid);
            let right = self.build(mid, end);
            self.nodes[id].children = Some((left, right));
        }

        id
    }

    fn bounding_ball(&self, start: usize, end: usize) -> (RadPoint, f64) {
        let members = &self.order[start..end];
        let n = members.len() as f64;
        let (sum_lat, sum_lon) = members.iter().fold((0.0, 0.0), |(la, lo), &i| {
            (la + self.points[i][0], lo + self.points[i][1])
        });
        let center = [sum_lat / n, sum_lon / n];
        let radius = members
            .iter()
            .map(|&i| haversine(center, self.points[i]))
            .fold(0.0, f64::max);
        (center, radius)
    }

    /// Coordinate (lat = 0, lon = 1) with the largest spread
    fn split_dimension(&self, start: usize, end: usize) -> usize {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for &i in &self.order[start..end] {
            for d in 0..2 {
                min[d] = min[d].min(self.points[i][d]);
                max[d] = max[d].max(self.points[i][d]);
            }
        }
        if max[1] - min[1] > max[0] - min[0] {
            1
        } else {
            0
        }
    }

    /// Indices of all points with `haversine(query, p) <= radius`, ascending
    pub fn query_radius(&self, query: RadPoint, radius: f64) -> Vec<usize> {
        let mut hits = Vec::new();
        if self.nodes.is_empty() {
            return hits;
        }

        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if haversine(query, node.center) - node.radius > radius + PRUNE_SLACK {
                continue;
            }
            match node.children {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => {
                    for &i in &self.order[node.start..node.end] {
                        if haversine(query, self.points[i]) <= radius {
                            hits.push(i);
                        }
                    }
                }
            }
        }

        hits.sort_unstable();
        hits
    }

    /// [`Self::query_radius`] for many queries, evaluated in parallel
    pub fn query_radius_many(&self, queries: &[RadPoint], radius: f64) -> Vec<Vec<usize>> {
        queries
            .par_iter()
            .map(|&q| self.query_radius(q, radius))
            .collect()
    }

    /// Closest point as `(index, distance)`, lowest index on ties
    pub fn nearest(&self, query: RadPoint) -> Option<(usize, f64)> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut best_idx = usize::MAX;
        let mut best_dist = f64::INFINITY;
        let mut stack = vec![0usize];

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            let lower_bound = haversine(query, node.center) - node.radius;
            if lower_bound > best_dist + PRUNE_SLACK {
                continue;
            }
            match node.children {
                Some((left, right)) => {
                    // Visit the closer child first so `best_dist` shrinks early
                    let dl = haversine(query, self.nodes[left].center);
                    let dr = haversine(query, self.nodes[right].center);
                    if dl <= dr {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
                None => {
                    for &i in &self.order[node.start..node.end] {
                        let d = haversine(query, self.points[i]);
                        if d < best_dist || (d == best_dist && i < best_idx) {
                            best_idx = i;
                            best_dist = d;
                        }
                    }
                }
            }
        }

        Some((best_idx, best_dist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine::{km_to_angular, nearest_brute_force, to_radians};

    /// Deterministic scatter around Guayaquil
    fn scatter(n: usize) -> Vec<RadPoint> {
        (0..n)
            .map(|i| {
                let a = (i as f64 * 0.618_033_988_75).fract();
                let b = (i as f64 * 0.414_213_562_37).fract();
                to_radians(-2.4 + a * 0.5, -80.1 + b * 0.5)
            })
            .collect()
    }

    fn brute_radius(points: &[RadPoint], q: RadPoint, r: f64) -> Vec<usize> {
        (0..points.len())
            .filter(|&i| haversine(q, points[i]) <= r)
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = BallTree::new(Vec::new());
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 0);
        assert!(tree.nearest(to_radians(0.0, 0.0)).is_none());
        assert!(tree.query_radius(to_radians(0.0, 0.0), 1.0).is_empty());
    }

    #[test]
    fn test_single_leaf_for_small_sets() {
        let tree = BallTree::new(scatter(DEFAULT_LEAF_SIZE));
        assert_eq!(tree.node_count(), 1);
        let tree = BallTree::new(scatter(DEFAULT_LEAF_SIZE + 1));
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_radius_matches_brute_force() {
        let points = scatter(2_000);
        let tree = BallTree::with_leaf_size(points.clone(), 8);
        let r = km_to_angular(3.0);
        for &q in points.iter().step_by(97) {
            assert_eq!(tree.query_radius(q, r), brute_radius(&points, q, r));
        }
    }

    #[test]
    fn test_radius_boundary_inclusive() {
        let a = to_radians(-2.19, -79.89);
        let b = to_radians(-2.18, -79.88);
        let r = haversine(a, b);
        let tree = BallTree::with_leaf_size(vec![a, b], 1);
        assert_eq!(tree.query_radius(a, r), vec![0, 1]);
        let just_below = f64::from_bits(r.to_bits() - 1);
        assert_eq!(tree.query_radius(a, just_below), vec![0]);
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let points = scatter(1_500);
        let tree = BallTree::with_leaf_size(points.clone(), 5);
        for i in 0..60 {
            let q = to_radians(-2.5 + i as f64 * 0.011, -80.2 + i as f64 * 0.013);
            assert_eq!(tree.nearest(q), nearest_brute_force(q, &points));
        }
    }

    #[test]
    fn test_nearest_tie_picks_lowest_index() {
        let q = to_radians(0.0, 0.0);
        let points = vec![
            to_radians(0.0, 0.5),
            to_radians(5.0, 5.0),
            to_radians(0.0, -0.5),
        ];
        let tree = BallTree::with_leaf_size(points, 1);
        assert_eq!(tree.nearest(q).map(|(i, _)| i), Some(0));
    }

    #[test]
    fn test_query_radius_many_preserves_order() {
        let points = scatter(300);
        let tree = BallTree::new(points.clone());
        let r = km_to_angular(2.0);
        let many = tree.query_radius_many(&points[..20], r);
        for (q, hits) in points[..20].iter().zip(&many) {
            assert_eq!(hits, &tree.query_radius(*q, r));
        }
    }
}

// ============================================================================
// Property-based Tests
// ============================================================================
