//! The jump transaction protocol
//!
//! A jump runs in three phases: a single-tick precheck, a multi-tick
//! charge whose conditions are re-polled every tick, and the transit
//! itself. The coordinator owns every active transaction and is the
//! only writer of gate Status/Phase during a jump.

pub mod charge;
pub mod coordinator;
pub mod failure;
pub mod timeline;

pub use charge::{control_for, ChargePoll, ChargeState};
pub use coordinator::{JumpCoordinator, JumpReport, TransitSummary};
pub use failure::{FailurePhase, JumpFailure};
pub use timeline::{ScriptedTimeline, TimelineOutcome, TimelinePlayer};
