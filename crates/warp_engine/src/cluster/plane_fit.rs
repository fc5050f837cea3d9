//! Envelope fitting
//!
//! Runs once per gate per re-evaluation. Drive pairs are grouped by the
//! plane their three points (two emitters plus the intersection node)
//! define; the winning plane orients the envelope and the remaining
//! drives size it.

use std::collections::BTreeSet;

use crate::cluster::clusters::DriveCluster;
use crate::config::RadiusMode;
use crate::drive::{Drive, DriveId};
use crate::foundation::math::{utils, Vec3};
use crate::gate::JumpEnvelope;

/// Two plane normals within this angle count as the same plane
const PLANE_MERGE_DEG: f32 = 2.0;

/// A drive's up axis must be within this angle of the plane normal to
/// count toward the plane's score
const UP_ALIGN_DEG: f32 = 0.5;

#[derive(Debug)]
struct PlaneGroup {
    normal: Vec3,
    drives: BTreeSet<DriveId>,
    pair_count: usize,
}

/// Fit an envelope for a cluster, or `None` when no pair defines a
/// usable plane (the gate keeps a degenerate envelope until its drives
/// change again).
pub fn fit_envelope(
    cluster: &DriveCluster,
    drives: &[Drive],
    volume_center: Vec3,
    construct_forward: Vec3,
    mode: RadiusMode,
) -> Option<JumpEnvelope> {
    let node = cluster.centroid();
    let find = |id: DriveId| drives.iter().find(|d| d.id == id);

    // Group pairs by the plane of their three points
    let mut groups: Vec<PlaneGroup> = Vec::new();
    let merge_cos = utils::deg_to_rad(PLANE_MERGE_DEG).cos();
    for pair in &cluster.pairs {
        let (Some(a), Some(b)) = (find(pair.a), find(pair.b)) else {
            continue;
        };
        let edge = b.local_origin - a.local_origin;
        let to_node = pair.node - a.local_origin;
        let cross = edge.cross(&to_node);
        if cross.magnitude() <= 1e-6 {
            continue;
        }
        let normal = cross.normalize();

        match groups
            .iter_mut()
            .find(|g| g.normal.dot(&normal).abs() >= merge_cos)
        {
            Some(group) => {
                group.drives.insert(pair.a);
                group.drives.insert(pair.b);
                group.pair_count += 1;
            }
            None => groups.push(PlaneGroup {
                normal,
                drives: [pair.a, pair.b].into_iter().collect(),
                pair_count: 1,
            }),
        }
    }
    if groups.is_empty() {
        return None;
    }

    // Score: drives whose up axis aligns with the plane normal, ties
    // broken by drive count, then by angle to the construct forward
    let align_cos = utils::deg_to_rad(UP_ALIGN_DEG).cos();
    let aligned_count = |group: &PlaneGroup| {
        group
            .drives
            .iter()
            .filter_map(|&id| find(id))
            .filter(|d| d.up.dot(&group.normal).abs() >= align_cos)
            .count()
    };
    let best = groups.iter().max_by(|x, y| {
        aligned_count(x)
            .cmp(&aligned_count(y))
            .then(x.drives.len().cmp(&y.drives.len()))
            .then_with(|| {
                let ax = utils::angle_between(&x.normal, &construct_forward);
                let ay = utils::angle_between(&y.normal, &construct_forward);
                // Smaller angle wins, so compare reversed
                ay.partial_cmp(&ax).unwrap_or(std::cmp::Ordering::Equal)
            })
    })?;

    // Outward orientation: the normal points away from the construct's
    // occupied volume
    let mut normal = best.normal;
    if (node - volume_center).dot(&normal) < 0.0 {
        normal = -normal;
    }

    // Size from the drives outside the chosen plane group; a ring gate
    // whose every drive sits in the plane sizes from the ring itself
    let off_plane: Vec<&Drive> = cluster
        .drives
        .iter()
        .filter(|id| !best.drives.contains(id))
        .filter_map(|&id| find(id))
        .collect();
    let sizing: Vec<&Drive> = if off_plane.is_empty() {
        cluster.drives.iter().filter_map(|&id| find(id)).collect()
    } else {
        off_plane
    };
    if sizing.is_empty() {
        return None;
    }

    let distances: Vec<f32> = sizing
        .iter()
        .map(|d| (d.local_origin - node).magnitude())
        .collect();
    let lateral_radius = match mode {
        RadiusMode::Min => distances.iter().copied().fold(f32::INFINITY, f32::min),
        RadiusMode::Max => distances.iter().copied().fold(0.0, f32::max),
        RadiusMode::Average => distances.iter().sum::<f32>() / distances.len() as f32,
    };
    let depth = sizing
        .iter()
        .map(|d| (d.local_origin - node).dot(&normal).abs())
        .fold(0.0, f32::max)
        .max(lateral_radius * 0.1);

    if lateral_radius <= f32::EPSILON {
        return None;
    }

    Some(JumpEnvelope {
        center: node,
        normal,
        lateral_radius,
        depth,
    })
}
