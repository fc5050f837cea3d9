//! Drive devices and per-construct drive bookkeeping
//!
//! A drive is a directional emitter block. Gates are formed from drive
//! pairs whose raycasts intersect (see [`crate::cluster`]); the registry
//! here only tracks the devices themselves and their ray geometry.

mod registry;

pub use registry::DriveRegistry;

use serde::{Serialize, Deserialize};

use crate::foundation::math::{Ray, Vec3};

/// Identifier of a drive within its construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveId(pub u32);

/// A directional emitter device belonging to exactly one construct and,
/// once clustered, at most one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    /// Identifier within the owning construct
    pub id: DriveId,

    /// Emitter position in construct-local space
    pub local_origin: Vec3,

    /// Emission direction in construct-local space (unit)
    pub direction: Vec3,

    /// Unobstructed raycast reach (meters)
    pub base_ray_distance: f32,

    /// Effective raycast reach after grid obstruction shortening
    pub max_ray_distance: f32,

    /// The drive's local "up" axis, used during envelope plane fitting
    pub up: Vec3,

    /// Whether the device is powered and functional
    pub working: bool,

    /// Currently stored power (MW)
    pub charge_mw: f32,

    /// Storage capacity (MW)
    pub max_charge_mw: f32,

    /// Recharge rate while working (MW per tick)
    pub recharge_mw_per_tick: f32,

    /// Local gate id this drive is assigned to, if clustered
    pub gate: Option<u16>,
}

impl Drive {
    /// Create a working drive with full charge
    pub fn new(id: DriveId, local_origin: Vec3, direction: Vec3, up: Vec3, reach: f32) -> Self {
        Self {
            id,
            local_origin,
            direction: direction.normalize(),
            base_ray_distance: reach,
            max_ray_distance: reach,
            up: up.normalize(),
            working: true,
            charge_mw: 3.0,
            max_charge_mw: 3.0,
            recharge_mw_per_tick: 0.01,
            gate: None,
        }
    }

    /// The drive's raycast in construct-local space
    pub fn local_ray(&self) -> Ray {
        Ray::new(self.local_origin, self.direction)
    }

    /// End point of the effective raycast in construct-local space
    pub fn ray_endpoint(&self) -> Vec3 {
        self.local_origin + self.direction * self.max_ray_distance
    }

    /// Drain up to `amount` MW from the drive, returning what was taken
    pub fn drain(&mut self, amount: f32) -> f32 {
        let taken = amount.min(self.charge_mw).max(0.0);
        self.charge_mw -= taken;
        taken
    }

    /// Recharge one tick's worth of power
    pub fn recharge_tick(&mut self) {
        if self.working {
            self.charge_mw = (self.charge_mw + self.recharge_mw_per_tick).min(self.max_charge_mw);
        }
    }
}
