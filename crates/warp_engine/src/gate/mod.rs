//! Gates: logical teleportation endpoints
//!
//! A gate is formed from two or more drives whose raycasts intersect.
//! It owns a jump node (construct-local centroid of the intersection
//! nodes), a bounding envelope, and a Status × Phase lifecycle pair.

mod state;
mod envelope;
mod controller;
mod gate;
mod registry;

pub use state::{GateStatus, GatePhase, GateError};
pub use envelope::{JumpEnvelope, WorldEnvelope};
pub use controller::{
    Waypoint, RoutingFlags, FitPolicy, ControllerSettings,
    ControllerBlock, RemoteAntenna, JumpControl, ControlKind,
};
pub use gate::{Gate, GateId, EffectHandle};
pub use registry::GateRegistry;
