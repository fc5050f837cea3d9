//! Drive-pair clustering and gate re-evaluation
//!
//! Turns the raw drive set of a construct into logical gates: pair
//! intersection, union-find merging, candidate selection, stable gate
//! id reassignment, and envelope fitting.

pub mod pairing;
pub mod clusters;
pub mod plane_fit;

pub use clusters::{build_clusters, AcceptedPair, DriveCluster};
pub use pairing::intersect_pair;
pub use plane_fit::fit_envelope;

use std::collections::BTreeSet;

use crate::config::EngineSettings;
use crate::drive::DriveId;
use crate::gate::JumpEnvelope;
use crate::world::{Construct, ConstructKey};

/// What a re-evaluation pass did to a construct's gates
#[derive(Debug, Default)]
pub struct ReclusterReport {
    /// Local ids of freshly created gates
    pub created: Vec<u16>,
    /// Local ids of gates that survived with updated geometry
    pub updated: Vec<u16>,
    /// Local ids of gates disposed because their cluster vanished
    pub removed: Vec<u16>,
    /// Candidate clusters dropped by the configured gate caps
    pub dropped_clusters: usize,
}

/// Re-evaluate all gates of a construct from its current drive set
///
/// Existing gate ids are reassigned to the cluster sharing the most
/// drives with them, minimizing gate churn on partial reconfiguration;
/// unmatched clusters receive recycled or fresh ids, and unmatched
/// gates are disposed.
pub fn reevaluate_gates(
    key: ConstructKey,
    construct: &mut Construct,
    settings: &EngineSettings,
) -> ReclusterReport {
    let mut report = ReclusterReport::default();
    let cell_size = construct.cell_size();
    construct.drives.shorten_rays(&construct.occupancy, cell_size);

    let drive_list: Vec<_> = construct.drives.iter().cloned().collect();
    let mut candidates: Vec<DriveCluster> =
        build_clusters(&drive_list, settings.raycast_width_tolerance)
            .into_iter()
            .filter(DriveCluster::is_candidate_gate)
            .collect();

    // Caps: biggest clusters win, the rest leave their drives unassigned
    candidates.sort_by_key(|c| std::cmp::Reverse(c.drives.len()));
    let cap = settings
        .max_gates_total
        .min(settings.max_gates_per_grid_size);
    if candidates.len() > cap {
        report.dropped_clusters = candidates.len() - cap;
        candidates.truncate(cap);
    }

    // Reassign existing ids to the cluster sharing the most drives
    let existing: Vec<(u16, BTreeSet<DriveId>)> = construct
        .gates
        .iter()
        .map(|g| (g.id.local, g.drives.iter().copied().collect()))
        .collect();
    let mut overlaps: Vec<(usize, u16, usize)> = Vec::new();
    for (cluster_index, cluster) in candidates.iter().enumerate() {
        for (gate_id, gate_drives) in &existing {
            let shared = cluster.drives.intersection(gate_drives).count();
            if shared > 0 {
                overlaps.push((shared, *gate_id, cluster_index));
            }
        }
    }
    overlaps.sort_by_key(|&(shared, gate_id, cluster_index)| {
        (std::cmp::Reverse(shared), gate_id, cluster_index)
    });

    let mut assignment: Vec<Option<u16>> = vec![None; candidates.len()];
    let mut taken_gates: BTreeSet<u16> = BTreeSet::new();
    for (_, gate_id, cluster_index) in overlaps {
        if assignment[cluster_index].is_none() && taken_gates.insert(gate_id) {
            assignment[cluster_index] = Some(gate_id);
        }
    }

    // Dispose gates whose cluster vanished
    let to_remove: Vec<u16> = existing
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !taken_gates.contains(id))
        .collect();
    for id in to_remove {
        construct.gates.remove(id);
        report.removed.push(id);
    }

    // Clear drive assignments; winning clusters re-establish them
    for drive in construct.drives.iter_mut() {
        drive.gate = None;
    }

    let volume_center = construct.local_volume_center();
    let forward = construct.local_forward();
    let controller_ids: Vec<_> = {
        let mut ids: Vec<_> = construct.controllers.keys().copied().collect();
        ids.sort();
        ids
    };

    for (cluster, assigned) in candidates.iter().zip(assignment) {
        let local = match assigned {
            Some(id) => {
                report.updated.push(id);
                id
            }
            None => {
                let id = construct.gates.create(key, construct.grid_size);
                report.created.push(id);
                id
            }
        };

        let envelope = fit_envelope(
            cluster,
            &drive_list,
            volume_center,
            forward,
            settings.radius_mode,
        )
        .unwrap_or_else(JumpEnvelope::degenerate);

        let taken_controllers: BTreeSet<_> = construct
            .gates
            .iter()
            .filter(|g| g.id.local != local)
            .filter_map(|g| g.controller)
            .collect();

        if let Some(gate) = construct.gates.get_mut(local) {
            gate.drives = cluster.drives.iter().copied().collect();
            gate.nodes = cluster.node_points();
            gate.local_node = cluster.centroid();
            gate.envelope = envelope;
            if gate.controller.is_none() {
                gate.controller = controller_ids
                    .iter()
                    .find(|id| !taken_controllers.contains(id))
                    .copied();
            }
            if gate.is_at_rest() {
                gate.refresh_validity();
            }
        }

        for drive_id in &cluster.drives {
            if let Some(drive) = construct.drives.get_mut(*drive_id) {
                drive.gate = Some(local);
            }
        }
    }

    report
}
