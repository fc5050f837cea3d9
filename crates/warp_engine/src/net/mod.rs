//! Replication surface
//!
//! The engine itself never touches a socket; it produces and consumes
//! plain messages. Every message carries an epoch for last-writer-wins
//! conflict resolution and a phase frame separating requests from
//! authority broadcasts.

pub mod messages;
pub mod snapshot;

pub use messages::{
    Channel, EpochFilter, JumpEvent, MessageKind, NetMessage, PhaseFrame,
};
pub use snapshot::{ConstructSnapshot, GateSnapshot};
