//! Constructs: groups of rigid sub-structures sharing one physics body

use std::collections::{HashMap, HashSet};

use crate::drive::DriveRegistry;
use crate::foundation::math::{Aabb, Transform, Vec3};
use crate::gate::{ControllerBlock, GateRegistry, RemoteAntenna};
use crate::world::{BlockId, ConstructKey, EntityKey, GridSize};

/// Stored-power block belonging to a construct
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Capacitor {
    /// Currently stored power (MW)
    pub stored_mw: f32,
    /// Storage capacity (MW)
    pub max_mw: f32,
}

impl Capacitor {
    /// Create a full capacitor
    pub fn new(max_mw: f32) -> Self {
        Self {
            stored_mw: max_mw,
            max_mw,
        }
    }

    /// Drain up to `amount` MW, returning what was taken
    pub fn drain(&mut self, amount: f32) -> f32 {
        let taken = amount.min(self.stored_mw).max(0.0);
        self.stored_mw -= taken;
        taken
    }
}

/// A group of physically joined sub-structures sharing one rigid-body
/// identity. Created when sub-structures merge or appear, destroyed when
/// empty; mutated by block add/remove events.
pub struct Construct {
    /// Display name
    pub name: String,

    /// Grid-size class, fixed at creation
    pub grid_size: GridSize,

    /// World transform of the construct origin
    pub transform: Transform,

    /// Linear velocity (m/s)
    pub velocity: Vec3,

    /// Total mass (kg)
    pub mass_kg: f32,

    /// Occupied grid cells in construct-local grid coordinates
    pub occupancy: HashSet<(i32, i32, i32)>,

    /// Capacitor blocks
    pub capacitors: Vec<Capacitor>,

    /// Drive devices
    pub drives: DriveRegistry,

    /// Gates formed from those drives
    pub gates: GateRegistry,

    /// Controller blocks by id
    pub controllers: HashMap<BlockId, ControllerBlock>,

    /// Antenna blocks by id
    pub antennas: HashMap<BlockId, RemoteAntenna>,

    /// Entities attached through couplers or landing gear
    pub attached_entities: HashSet<EntityKey>,

    /// Other constructs coupled to this one
    pub coupled_constructs: HashSet<ConstructKey>,

    /// Whether the construct is currently mid-transit through a gate
    pub mid_transit: bool,

    /// Force accumulated by the charge phase, consumed by the physics
    /// step on the main pass
    pub pending_force: Vec3,

    next_block_id: u32,
}

impl Construct {
    /// Create an empty construct
    pub fn new(name: impl Into<String>, grid_size: GridSize, transform: Transform) -> Self {
        Self {
            name: name.into(),
            grid_size,
            transform,
            velocity: Vec3::zeros(),
            mass_kg: 0.0,
            occupancy: HashSet::new(),
            capacitors: Vec::new(),
            drives: DriveRegistry::new(),
            gates: GateRegistry::new(),
            controllers: HashMap::new(),
            antennas: HashMap::new(),
            attached_entities: HashSet::new(),
            coupled_constructs: HashSet::new(),
            mid_transit: false,
            pending_force: Vec3::zeros(),
            next_block_id: 0,
        }
    }

    /// Allocate a block id for a device block
    pub fn allocate_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    /// Add a structural block at a grid cell
    pub fn add_block(&mut self, cell: (i32, i32, i32), mass_kg: f32) {
        if self.occupancy.insert(cell) {
            self.mass_kg += mass_kg;
        }
    }

    /// Remove a structural block from a grid cell
    pub fn remove_block(&mut self, cell: (i32, i32, i32), mass_kg: f32) {
        if self.occupancy.remove(&cell) {
            self.mass_kg = (self.mass_kg - mass_kg).max(0.0);
        }
    }

    /// Whether the construct has no structure left
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty() && self.drives.is_empty()
    }

    /// Edge length of this construct's grid cells
    pub fn cell_size(&self) -> f32 {
        self.grid_size.cell_size()
    }

    /// Center of a grid cell in construct-local space
    pub fn local_cell_center(&self, cell: (i32, i32, i32)) -> Vec3 {
        let s = self.cell_size();
        Vec3::new(
            (cell.0 as f32 + 0.5) * s,
            (cell.1 as f32 + 0.5) * s,
            (cell.2 as f32 + 0.5) * s,
        )
    }

    /// Center of a grid cell in world space
    pub fn world_cell_center(&self, cell: (i32, i32, i32)) -> Vec3 {
        self.transform.transform_point(self.local_cell_center(cell))
    }

    /// Centroid of the occupied volume in construct-local space
    pub fn local_volume_center(&self) -> Vec3 {
        if self.occupancy.is_empty() {
            return Vec3::zeros();
        }
        let mut sum = Vec3::zeros();
        for cell in &self.occupancy {
            sum += self.local_cell_center(*cell);
        }
        sum / self.occupancy.len() as f32
    }

    /// The construct's forward axis in construct-local space
    pub fn local_forward(&self) -> Vec3 {
        -Vec3::z()
    }

    /// World-space bounding box of the occupied cells
    pub fn world_aabb(&self) -> Option<Aabb> {
        let points: Vec<Vec3> = self
            .occupancy
            .iter()
            .map(|cell| self.world_cell_center(*cell))
            .collect();
        let mut aabb = Aabb::from_points(&points)?;
        let half = self.cell_size() * 0.5;
        aabb.min -= Vec3::new(half, half, half);
        aabb.max += Vec3::new(half, half, half);
        Some(aabb)
    }

    /// Whether any block of this construct occupies the given world
    /// point
    pub fn occupies_world_point(&self, point: Vec3) -> bool {
        let local = self.transform.inverse_transform_point(point);
        let s = self.cell_size();
        let cell = (
            (local.x / s).floor() as i32,
            (local.y / s).floor() as i32,
            (local.z / s).floor() as i32,
        );
        self.occupancy.contains(&cell)
    }

    /// Instantly available capacitor power (MW)
    pub fn capacitor_charge_mw(&self) -> f32 {
        self.capacitors.iter().map(|c| c.stored_mw).sum()
    }
}
