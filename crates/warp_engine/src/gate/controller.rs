//! Jump control surfaces and per-gate settings
//!
//! A jump can be initiated either from a controller block attached to
//! the gate or from a remote antenna in range. Both expose the same
//! small capability trait so the coordinator never branches on which
//! one it is talking to.

use bitflags::bitflags;
use serde::{Serialize, Deserialize};

use crate::foundation::math::Vec3;
use crate::gate::GateId;
use crate::world::{BeaconId, BlockId, ServerId};

bitflags! {
    /// Directions a gate is allowed to route jumps in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoutingFlags: u8 {
        /// Gate accepts incoming transits
        const INBOUND = 0b01;
        /// Gate may initiate outgoing transits
        const OUTBOUND = 0b10;
    }
}

impl Default for RoutingFlags {
    fn default() -> Self {
        RoutingFlags::INBOUND | RoutingFlags::OUTBOUND
    }
}

/// The jump destination
///
/// Exactly one meaning at a time; `None` means the gate is unconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Waypoint {
    /// Another gate
    Gate(GateId),
    /// A navigation beacon
    Beacon(BeaconId),
    /// A remote server endpoint
    Server(ServerId),
    /// A raw world coordinate
    Coordinate(Vec3),
    /// No destination selected
    None,
}

/// Whether a batch must fit wholly inside the destination jump space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitPolicy {
    /// Reject batches whose obstruction volume exceeds the jump space
    RequireWholeFit,
    /// Only the batch root's position must be inside
    CenterOnly,
}

/// Per-gate configuration, owned by a controller or antenna block.
/// The gate reads these settings but does not own them.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Selected destination
    pub waypoint: Waypoint,

    /// Permitted routing directions
    pub routing: RoutingFlags,

    /// Heaviest batch allowed through (kg), unlimited when absent
    pub max_batch_mass_kg: Option<f32>,

    /// Largest batch bounding radius allowed through (m)
    pub max_batch_radius_m: Option<f32>,

    /// Jump-space fit policy for batches
    pub fit_policy: FitPolicy,

    /// Override for the synthesized arrival frame normal on untethered
    /// jumps
    pub normal_override: Option<Vec3>,

    /// Whether cancellation takes effect mid-charge (true) or only once
    /// the charge animation completes (false)
    pub immediate_cancel: bool,

    /// Auto-activation countdown in ticks; the gate jumps on its own
    /// when this reaches zero
    pub auto_activation_ticks: Option<u32>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            waypoint: Waypoint::None,
            routing: RoutingFlags::default(),
            max_batch_mass_kg: None,
            max_batch_radius_m: None,
            fit_policy: FitPolicy::RequireWholeFit,
            normal_override: None,
            immediate_cancel: true,
            auto_activation_ticks: None,
        }
    }
}

/// Which kind of control surface initiated a jump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// A controller block attached to the gate
    Controller,
    /// A remote antenna in range of the gate
    RemoteAntenna,
}

/// Capability exposed by anything that can command a gate
pub trait JumpControl {
    /// Which kind of control surface this is
    fn kind(&self) -> ControlKind;

    /// Whether the device is powered on
    fn enabled(&self) -> bool;

    /// Whether the device can currently reach the gate
    fn connected_to(&self, gate_node_world: Vec3) -> bool;

    /// The gate settings this device carries
    fn settings(&self) -> &ControllerSettings;
}

/// Controller block physically attached to a gate's construct
#[derive(Debug, Clone)]
pub struct ControllerBlock {
    /// Block identity within the construct
    pub block: BlockId,
    /// Whether the block is powered
    pub enabled: bool,
    /// Gate settings owned by this block
    pub settings: ControllerSettings,
}

impl JumpControl for ControllerBlock {
    fn kind(&self) -> ControlKind {
        ControlKind::Controller
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn connected_to(&self, _gate_node_world: Vec3) -> bool {
        // Attached controllers are wired to the grid, always reachable
        true
    }

    fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}

/// Remote antenna commanding a gate over the air
#[derive(Debug, Clone)]
pub struct RemoteAntenna {
    /// Block identity within the construct
    pub block: BlockId,
    /// Whether the antenna is powered
    pub enabled: bool,
    /// Antenna position in world space
    pub world_position: Vec3,
    /// Broadcast range (meters)
    pub range_m: f32,
    /// Gate settings owned by this antenna
    pub settings: ControllerSettings,
}

impl JumpControl for RemoteAntenna {
    fn kind(&self) -> ControlKind {
        ControlKind::RemoteAntenna
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn connected_to(&self, gate_node_world: Vec3) -> bool {
        (gate_node_world - self.world_position).magnitude() <= self.range_m
    }

    fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}
