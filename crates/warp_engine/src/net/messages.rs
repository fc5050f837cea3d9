//! Replication messages
//!
//! Every message carries the sender's epoch and a phase frame. Receivers
//! apply last-writer-wins per channel: a message older than the newest
//! epoch already seen for its gate or construct is dropped, so
//! out-of-order delivery can never resurrect stale state.

use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use crate::foundation::math::Vec3;
use crate::gate::GateId;
use crate::jump::{FailurePhase, JumpFailure};
use crate::net::snapshot::{ConstructSnapshot, GateSnapshot};
use crate::world::ConstructKey;

/// Which half of the two-frame protocol a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseFrame {
    /// Frame 1: a client asking the authority to act
    Request,
    /// Frame 2: the authority broadcasting the result
    Broadcast,
}

/// A jump lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JumpEvent {
    /// A jump was admitted and started charging
    Started {
        /// Tethered destination, absent for untethered jumps
        target: Option<GateId>,
    },
    /// The transit completed
    Succeeded {
        /// Batches moved
        jumped: usize,
        /// Batches the resolver cleared
        total: usize,
        /// Batches still warping when the result was emitted
        warps: usize,
    },
    /// The jump failed
    Failed {
        /// Why
        reason: JumpFailure,
        /// Which phase the failure is attributed to
        phase: FailurePhase,
    },
    /// The gate ceased to exist while a jump referenced it
    Closed,
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Full state of one gate
    GateSnapshot(GateSnapshot),
    /// Full state of one construct and its gates
    ConstructSnapshot(ConstructSnapshot),
    /// A jump lifecycle event on a gate
    JumpEvent {
        /// Gate the event belongs to
        gate: GateId,
        /// What happened
        event: JumpEvent,
    },
    /// Corrected destination of an outbound gate
    TrueEndpoint {
        /// Outbound gate
        gate: GateId,
        /// Corrected arrival point in world space
        endpoint: Vec3,
    },
    /// Auto-activation countdown progress
    AutoActivation {
        /// Gate counting down
        gate: GateId,
        /// Ticks until the gate jumps on its own
        remaining_ticks: u32,
    },
    /// Debug request to re-run gate evaluation on a construct
    DebugRecompute {
        /// Construct to re-evaluate
        construct: ConstructKey,
    },
}

/// One replication message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetMessage {
    /// Sender epoch, monotonically increasing per authority
    pub epoch: u64,
    /// Which protocol frame this message belongs to
    pub phase_frame: PhaseFrame,
    /// Payload
    pub kind: MessageKind,
}

impl NetMessage {
    /// The replication channel this message competes on
    pub fn channel(&self) -> Channel {
        match &self.kind {
            MessageKind::GateSnapshot(snapshot) => Channel::Gate(snapshot.id),
            MessageKind::ConstructSnapshot(snapshot) => Channel::Construct(snapshot.key),
            MessageKind::JumpEvent { gate, .. } => Channel::Gate(*gate),
            MessageKind::TrueEndpoint { gate, .. } => Channel::Gate(*gate),
            MessageKind::AutoActivation { gate, .. } => Channel::Gate(*gate),
            MessageKind::DebugRecompute { construct } => Channel::Construct(*construct),
        }
    }
}

/// Key a message competes on for last-writer-wins ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Per-gate channel
    Gate(GateId),
    /// Per-construct channel
    Construct(ConstructKey),
}

/// Per-channel last-writer-wins epoch filter
#[derive(Debug, Default)]
pub struct EpochFilter {
    latest: HashMap<Channel, u64>,
}

impl EpochFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the message is fresh for its channel; fresh messages
    /// advance the channel's epoch. A replay of the last applied epoch
    /// is stale, so duplicates are never re-processed.
    pub fn accept(&mut self, message: &NetMessage) -> bool {
        match self.latest.get_mut(&message.channel()) {
            Some(entry) if message.epoch <= *entry => false,
            Some(entry) => {
                *entry = message.epoch;
                true
            }
            None => {
                self.latest.insert(message.channel(), message.epoch);
                true
            }
        }
    }
}
