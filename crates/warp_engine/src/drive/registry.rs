//! Per-construct drive registry

use std::collections::{BTreeMap, HashSet};

use crate::drive::{Drive, DriveId};
use crate::foundation::math::Vec3;

/// Tracks the drives of a single construct
///
/// Registration mirrors the collider registry pattern: devices are added
/// and removed as blocks appear and disappear, and ray reach is
/// recomputed against the construct's own occupancy.
#[derive(Debug, Default, Clone)]
pub struct DriveRegistry {
    drives: BTreeMap<DriveId, Drive>,
    next_id: u32,
    dirty: bool,
}

impl DriveRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new drive and return its id
    pub fn add(&mut self, local_origin: Vec3, direction: Vec3, up: Vec3, reach: f32) -> DriveId {
        let id = DriveId(self.next_id);
        self.next_id += 1;
        self.drives.insert(id, Drive::new(id, local_origin, direction, up, reach));
        self.dirty = true;
        id
    }

    /// Insert a drive under its own id (used when rebuilding from a
    /// snapshot); does not flag a re-cluster
    pub fn insert(&mut self, drive: Drive) {
        self.next_id = self.next_id.max(drive.id.0 + 1);
        self.drives.insert(drive.id, drive);
    }

    /// Remove a drive
    pub fn remove(&mut self, id: DriveId) -> Option<Drive> {
        let removed = self.drives.remove(&id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Look up a drive
    pub fn get(&self, id: DriveId) -> Option<&Drive> {
        self.drives.get(&id)
    }

    /// Look up a drive mutably
    pub fn get_mut(&mut self, id: DriveId) -> Option<&mut Drive> {
        self.drives.get_mut(&id)
    }

    /// Iterate all drives in id order
    pub fn iter(&self) -> impl Iterator<Item = &Drive> {
        self.drives.values()
    }

    /// Iterate all drives mutably in id order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Drive> {
        self.drives.values_mut()
    }

    /// Total number of drives
    pub fn len(&self) -> usize {
        self.drives.len()
    }

    /// Whether no drives are registered
    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Number of working drives assigned to the given gate
    pub fn working_count_for_gate(&self, gate: u16) -> usize {
        self.drives
            .values()
            .filter(|d| d.working && d.gate == Some(gate))
            .count()
    }

    /// Working drives assigned to the given gate, in id order
    pub fn working_for_gate(&self, gate: u16) -> Vec<DriveId> {
        self.drives
            .values()
            .filter(|d| d.working && d.gate == Some(gate))
            .map(|d| d.id)
            .collect()
    }

    /// Whether drive membership changed since the last re-cluster pass
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Force a re-cluster on the next update pass
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Shorten each drive's effective ray reach to the first occupied
    /// grid cell along its ray, stepping one cell at a time.
    pub fn shorten_rays(&mut self, occupancy: &HashSet<(i32, i32, i32)>, cell_size: f32) {
        for drive in self.drives.values_mut() {
            let mut reach = drive.base_ray_distance;
            let steps = (drive.base_ray_distance / cell_size).ceil() as i32;
            for step in 1..=steps {
                let t = step as f32 * cell_size;
                let p = drive.local_origin + drive.direction * t;
                let cell = (
                    (p.x / cell_size).floor() as i32,
                    (p.y / cell_size).floor() as i32,
                    (p.z / cell_size).floor() as i32,
                );
                if occupancy.contains(&cell) {
                    reach = t - cell_size;
                    break;
                }
            }
            let shortened = reach.max(0.0);
            if (shortened - drive.max_ray_distance).abs() > f32::EPSILON {
                drive.max_ray_distance = shortened;
                self.dirty = true;
            }
        }
    }
}
