//! Per-construct gate registry
//!
//! Local gate ids are small dense integers. Removal enqueues the id for
//! recycling before any fresh id is allocated, and `remap` compacts the
//! live ids back to `[0, count)` after bulk changes.

use std::collections::{BTreeMap, VecDeque};

use crate::gate::{Gate, GateId};
use crate::world::{ConstructKey, GridSize};

/// Owns the gates of a single construct
#[derive(Debug, Default, Clone)]
pub struct GateRegistry {
    gates: BTreeMap<u16, Gate>,
    free_ids: VecDeque<u16>,
    next_id: u16,
}

impl GateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a local id, preferring recycled ids over fresh ones
    pub fn allocate_id(&mut self) -> u16 {
        if let Some(id) = self.free_ids.pop_front() {
            id
        } else {
            let id = self.next_id;
            self.next_id += 1;
            id
        }
    }

    /// Create and insert a fresh gate, returning its local id
    pub fn create(&mut self, construct: ConstructKey, grid_size: GridSize) -> u16 {
        let local = self.allocate_id();
        let gate = Gate::new(GateId { construct, local }, grid_size);
        self.gates.insert(local, gate);
        local
    }

    /// Insert a gate under its own id (used when rebuilding from a
    /// snapshot)
    pub fn insert(&mut self, gate: Gate) {
        let local = gate.id.local;
        self.next_id = self.next_id.max(local + 1);
        self.free_ids.retain(|&id| id != local);
        self.gates.insert(local, gate);
    }

    /// Look up a gate
    pub fn get(&self, local: u16) -> Option<&Gate> {
        self.gates.get(&local)
    }

    /// Look up a gate mutably
    pub fn get_mut(&mut self, local: u16) -> Option<&mut Gate> {
        self.gates.get_mut(&local)
    }

    /// Remove a gate, enqueueing its id for recycling
    pub fn remove(&mut self, local: u16) -> Option<Gate> {
        let removed = self.gates.remove(&local);
        if removed.is_some() {
            self.free_ids.push_back(local);
        }
        removed
    }

    /// Iterate gates in local-id order
    pub fn iter(&self) -> impl Iterator<Item = &Gate> {
        self.gates.values()
    }

    /// Iterate gates mutably in local-id order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Gate> {
        self.gates.values_mut()
    }

    /// Local ids currently in use
    pub fn ids(&self) -> Vec<u16> {
        self.gates.keys().copied().collect()
    }

    /// Number of live gates
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Whether the registry holds no gates
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Compact live ids to `[0, count)`, returning the (old, new) pairs
    /// that changed so callers can fix drive assignments and references
    pub fn remap(&mut self) -> Vec<(u16, u16)> {
        let old: Vec<u16> = self.gates.keys().copied().collect();
        let mut moves = Vec::new();
        for (new_id, old_id) in old.into_iter().enumerate() {
            let new_id = new_id as u16;
            if new_id != old_id {
                if let Some(mut gate) = self.gates.remove(&old_id) {
                    gate.id.local = new_id;
                    self.gates.insert(new_id, gate);
                    moves.push((old_id, new_id));
                }
            }
        }
        self.free_ids.clear();
        self.next_id = self.gates.len() as u16;
        moves
    }
}
