//! World model: constructs, free entities, and navigation endpoints
//!
//! The world owns every construct and free entity through slotmap
//! stores, plus the beacon/server tables that jump waypoints resolve
//! against and the gravity sources used to bend untethered jump paths.

mod construct;
mod entity;

pub use construct::{Construct, Capacitor};
pub use entity::WorldEntity;

use std::collections::HashMap;

use serde::{Serialize, Deserialize};
use slotmap::{SlotMap, new_key_type};

use crate::foundation::math::Vec3;
use crate::gate::{Gate, GateId, WorldEnvelope};

new_key_type! {
    /// Stable key of a construct in the world
    pub struct ConstructKey;

    /// Stable key of a free entity in the world
    pub struct EntityKey;
}

/// Identifier of a block within its construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Identifier of a navigation beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconId(pub u32);

/// Identifier of a remote server endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u32);

/// Grid-size class of a construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridSize {
    /// Half-meter cells
    Small,
    /// 2.5 meter cells
    Large,
}

impl GridSize {
    /// Edge length of one grid cell in meters
    pub fn cell_size(self) -> f32 {
        match self {
            GridSize::Small => 0.5,
            GridSize::Large => 2.5,
        }
    }
}

/// A navigation beacon a gate can target
#[derive(Debug, Clone)]
pub struct Beacon {
    /// Beacon position in world space
    pub position: Vec3,
    /// Whether arrivals at this beacon are currently blocked
    pub blocked: bool,
}

/// A remote server a gate can route to
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    /// Whether the cross-server link is up
    pub reachable: bool,
    /// Arrival point used when simulating the handoff locally
    pub arrival: Vec3,
}

/// A spherical gravity source
#[derive(Debug, Clone)]
pub struct GravitySource {
    /// Center of the field
    pub center: Vec3,
    /// Surface acceleration (m/s^2)
    pub strength: f32,
    /// Field radius; no pull beyond this
    pub radius: f32,
}

/// The mutable world: constructs, entities, endpoints, gravity
#[derive(Default)]
pub struct WorldModel {
    /// All constructs
    pub constructs: SlotMap<ConstructKey, Construct>,
    /// All free entities
    pub entities: SlotMap<EntityKey, WorldEntity>,
    /// Beacon table for waypoint resolution
    pub beacons: HashMap<BeaconId, Beacon>,
    /// Server table for cross-server waypoints
    pub servers: HashMap<ServerId, ServerEndpoint>,
    /// Gravity sources for path bending
    pub gravity_sources: Vec<GravitySource>,
}

impl WorldModel {
    /// Create an empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a construct and return its key
    pub fn spawn_construct(&mut self, construct: Construct) -> ConstructKey {
        self.constructs.insert(construct)
    }

    /// Remove a construct (destroys its gates and drives with it)
    pub fn remove_construct(&mut self, key: ConstructKey) -> Option<Construct> {
        self.constructs.remove(key)
    }

    /// Add a free entity and return its key
    pub fn spawn_entity(&mut self, entity: WorldEntity) -> EntityKey {
        self.entities.insert(entity)
    }

    /// Look up a gate by its two-part id
    pub fn gate(&self, id: GateId) -> Option<&Gate> {
        self.constructs.get(id.construct)?.gates.get(id.local)
    }

    /// Look up a gate mutably by its two-part id
    pub fn gate_mut(&mut self, id: GateId) -> Option<&mut Gate> {
        self.constructs.get_mut(id.construct)?.gates.get_mut(id.local)
    }

    /// Resolve a gate's envelope into world space
    pub fn gate_world_envelope(&self, id: GateId) -> Option<WorldEnvelope> {
        let construct = self.constructs.get(id.construct)?;
        let gate = construct.gates.get(id.local)?;
        Some(gate.world_envelope(&construct.transform))
    }

    /// Resolve a gate's jump node into world space
    pub fn gate_world_node(&self, id: GateId) -> Option<Vec3> {
        let construct = self.constructs.get(id.construct)?;
        let gate = construct.gates.get(id.local)?;
        Some(gate.world_node(&construct.transform))
    }

    /// Net gravity acceleration at a world point
    pub fn gravity_at(&self, point: Vec3) -> Vec3 {
        let mut total = Vec3::zeros();
        for source in &self.gravity_sources {
            let offset = source.center - point;
            let distance = offset.magnitude();
            if distance <= f32::EPSILON || distance > source.radius {
                continue;
            }
            // Linear falloff toward the field edge
            let strength = source.strength * (1.0 - distance / source.radius);
            total += offset / distance * strength;
        }
        total
    }

    /// Free entities whose position lies inside the envelope
    pub fn entities_in(&self, envelope: &WorldEnvelope) -> Vec<EntityKey> {
        self.entities
            .iter()
            .filter(|(_, e)| envelope.contains_point(e.transform.position))
            .map(|(k, _)| k)
            .collect()
    }

    /// Constructs whose origin lies inside the envelope
    pub fn constructs_in(&self, envelope: &WorldEnvelope) -> Vec<ConstructKey> {
        self.constructs
            .iter()
            .filter(|(_, c)| envelope.contains_point(c.transform.position))
            .map(|(k, _)| k)
            .collect()
    }
}
