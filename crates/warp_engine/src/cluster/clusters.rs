//! Merging accepted drive pairs into clusters
//!
//! A cluster is a connected component over the "raycasts intersect"
//! relation. Pairs are merged union-find style keyed by drive identity:
//! a new pair starts a cluster, joins one, or fuses two. Membership and
//! node sets are deduplicated, so the result does not depend on the
//! order pairs are visited in.

use std::collections::BTreeSet;

use crate::cluster::pairing::intersect_pair;
use crate::drive::{Drive, DriveId};
use crate::foundation::math::Vec3;

/// An accepted drive pair and its intersection node
#[derive(Debug, Clone, Copy)]
pub struct AcceptedPair {
    /// Lower drive id of the pair
    pub a: DriveId,
    /// Higher drive id of the pair
    pub b: DriveId,
    /// Intersection node in construct-local space
    pub node: Vec3,
}

impl AcceptedPair {
    fn new(a: DriveId, b: DriveId, node: Vec3) -> Self {
        // Normalized ordering makes the pair key order-independent
        if a <= b {
            Self { a, b, node }
        } else {
            Self { a: b, b: a, node }
        }
    }
}

/// A connected set of drives with their accepted intersection nodes
#[derive(Debug, Clone, Default)]
pub struct DriveCluster {
    /// Member drives, deduplicated
    pub drives: BTreeSet<DriveId>,
    /// Accepted pairs, deduplicated by pair key
    pub pairs: Vec<AcceptedPair>,
}

impl DriveCluster {
    /// Whether the cluster qualifies as a candidate gate
    pub fn is_candidate_gate(&self) -> bool {
        self.drives.len() >= 2 && !self.pairs.is_empty()
    }

    /// The intersection node points
    pub fn node_points(&self) -> Vec<Vec3> {
        self.pairs.iter().map(|p| p.node).collect()
    }

    /// Centroid of all accepted intersection nodes; this becomes the
    /// cluster's logical jump node
    pub fn centroid(&self) -> Vec3 {
        if self.pairs.is_empty() {
            return Vec3::zeros();
        }
        let mut sum = Vec3::zeros();
        for pair in &self.pairs {
            sum += pair.node;
        }
        sum / self.pairs.len() as f32
    }

    fn contains(&self, drive: DriveId) -> bool {
        self.drives.contains(&drive)
    }

    fn add_pair(&mut self, pair: AcceptedPair) {
        self.drives.insert(pair.a);
        self.drives.insert(pair.b);
        if !self.pairs.iter().any(|p| p.a == pair.a && p.b == pair.b) {
            self.pairs.push(pair);
        }
    }

    fn absorb(&mut self, other: DriveCluster) {
        for pair in other.pairs {
            self.add_pair(pair);
        }
    }

    fn normalize(&mut self) {
        self.pairs.sort_by_key(|p| (p.a, p.b));
    }
}

/// Build clusters from all drive pairs of a construct
pub fn build_clusters(drives: &[Drive], tolerance: f32) -> Vec<DriveCluster> {
    let mut clusters: Vec<DriveCluster> = Vec::new();

    for i in 0..drives.len() {
        for j in (i + 1)..drives.len() {
            let (a, b) = (&drives[i], &drives[j]);
            if !a.working || !b.working {
                continue;
            }
            let Some(hit) = intersect_pair(a, b, tolerance) else {
                continue;
            };
            let pair = AcceptedPair::new(a.id, b.id, hit.node);

            let index_a = clusters.iter().position(|c| c.contains(pair.a));
            let index_b = clusters.iter().position(|c| c.contains(pair.b));
            match (index_a, index_b) {
                (None, None) => {
                    let mut cluster = DriveCluster::default();
                    cluster.add_pair(pair);
                    clusters.push(cluster);
                }
                (Some(index), None) | (None, Some(index)) => {
                    clusters[index].add_pair(pair);
                }
                (Some(x), Some(y)) if x == y => {
                    clusters[x].add_pair(pair);
                }
                (Some(x), Some(y)) => {
                    // Fuse the two clusters, deduplicating members
                    let (keep, absorb) = if x < y { (x, y) } else { (y, x) };
                    let other = clusters.swap_remove(absorb);
                    clusters[keep].absorb(other);
                    clusters[keep].add_pair(pair);
                }
            }
        }
    }

    for cluster in &mut clusters {
        cluster.normalize();
    }
    // Stable output order regardless of discovery order
    clusters.sort_by_key(|c| c.drives.iter().next().copied());
    clusters
}
