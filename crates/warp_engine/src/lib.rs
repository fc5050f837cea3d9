//! # Warp Engine
//!
//! A jump gate transit engine: drives raycast across their construct,
//! pair up by intersection geometry, and cluster into gates; gates run
//! a three-phase jump protocol (precheck, charge, transit) that moves
//! batches of entities and constructs between envelopes, syphoning the
//! power the transit costs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warp_engine::prelude::*;
//!
//! fn main() {
//!     let settings = EngineSettings::default();
//!     let timeline = Box::new(ScriptedTimeline::instant());
//!     let mut session = Session::new(settings, timeline);
//!
//!     let construct = Construct::new(
//!         "gate rig",
//!         GridSize::Large,
//!         Transform::identity(),
//!     );
//!     let key = session.world.spawn_construct(construct);
//!     session.tick();
//!     let _ = key;
//! }
//! ```

#![warn(missing_docs)]

pub mod foundation;
pub mod config;
pub mod world;
pub mod drive;
pub mod cluster;
pub mod gate;
pub mod batch;
pub mod power;
pub mod jump;
pub mod net;

mod session;

pub use session::{EffectRegistry, Session};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        EffectRegistry, Session,
        config::EngineSettings,
        foundation::{
            math::{Quat, Transform, Vec3},
            time::{Tick, TickClock, TICK_RATE},
        },
        world::{
            Beacon, BeaconId, BlockId, Capacitor, Construct, ConstructKey, EntityKey,
            GridSize, ServerEndpoint, ServerId, WorldEntity, WorldModel,
        },
        drive::{Drive, DriveId, DriveRegistry},
        gate::{
            ControllerBlock, ControllerSettings, Gate, GateId, GatePhase,
            GateStatus, JumpControl, RemoteAntenna, RoutingFlags, Waypoint,
        },
        jump::{
            JumpCoordinator, JumpFailure, JumpReport, ScriptedTimeline,
            TimelineOutcome, TimelinePlayer, TransitSummary,
        },
        net::{EpochFilter, GateSnapshot, JumpEvent, MessageKind, NetMessage},
    };
}
