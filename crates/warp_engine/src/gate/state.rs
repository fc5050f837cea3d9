//! Gate lifecycle state
//!
//! Status and Phase are tracked as an independent pair: Status answers
//! "what role is the gate playing" while Phase answers "where in the
//! jump timeline is it". Cancellation flips Status without touching
//! Phase, so a charging gate can be cancelled while its animation keeps
//! running to completion.

use serde::{Serialize, Deserialize};

/// The role a gate currently plays in a jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateStatus {
    /// Not a valid gate (fewer than two drives or no intersection node)
    None,
    /// Transitioning back to rest after a jump
    Switching,
    /// Valid and available
    Idle,
    /// Source end of an active jump
    Outbound,
    /// Destination end of an active jump
    Inbound,
    /// Jump cancelled; phase continues until the timeline completes
    Cancelled,
}

/// Where in the jump timeline a gate currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatePhase {
    /// Not a valid gate
    None,
    /// At rest
    Idle,
    /// Multi-tick charge running
    Charging,
    /// Transit executing
    Jumping,
    /// Returning to rest
    Resetting,
}

/// Errors raised by gate state transitions
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    /// The gate is already participating in a jump
    #[error("gate is busy with another jump")]
    Busy,

    /// The gate is not in the Idle/Idle resting state
    #[error("gate is not idle")]
    NotIdle,

    /// The gate does not satisfy the validity invariant
    #[error("gate is invalid")]
    Invalid,
}
