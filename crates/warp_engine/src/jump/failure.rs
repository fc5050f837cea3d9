//! The closed set of jump failure outcomes
//!
//! Every failed jump attempt resolves to exactly one of these variants.
//! Each is attributed to either the init phase (precheck) or the
//! post-charge phase, because user-facing messaging and sound cues
//! differ by phase.

use serde::{Serialize, Deserialize};

/// Which half of the protocol a failure surfaced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePhase {
    /// Rejected by the single-tick precheck
    Init,
    /// Detected during or after the charge phase
    PostCharge,
}

/// Why a jump attempt did not (fully) happen
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpFailure {
    // Source side
    /// Source gate fails the validity invariant
    #[error("source gate is invalid")]
    SourceInvalid,
    /// No control surface can reach the source gate
    #[error("source gate control is disconnected")]
    SourceDisconnected,
    /// Source control surface is powered off
    #[error("source gate control is disabled")]
    SourceDisabled,
    /// No waypoint or no control surface configured
    #[error("source gate is not configured")]
    SourceUnconfigured,
    /// Source gate is already part of another jump
    #[error("source gate is busy")]
    SourceBusy,
    /// Source gate has routing disabled entirely
    #[error("source gate routing is disabled")]
    SourceRoutingDisabled,
    /// Source gate only accepts inbound transits
    #[error("source gate is inbound-only")]
    SourceInboundOnly,
    /// Source routing permissions changed mid-charge
    #[error("source routing changed during charge")]
    SourceRoutingChanged,
    /// Source gate or its construct ceased to exist
    #[error("source gate closed")]
    SourceClosed,

    // Destination side
    /// Waypoint does not resolve to a live destination
    #[error("destination is unavailable")]
    DestinationUnavailable,
    /// Destination gate has routing disabled entirely
    #[error("destination routing is disabled")]
    DestinationRoutingDisabled,
    /// Destination gate only initiates outbound transits
    #[error("destination gate is outbound-only")]
    DestinationOutboundOnly,
    /// Destination refuses this source
    #[error("destination is forbidden")]
    DestinationForbidden,
    /// Destination control surface is powered off
    #[error("destination gate control is disabled")]
    DestinationDisabled,
    /// Destination gate has no control surface
    #[error("destination gate is not configured")]
    DestinationUnconfigured,
    /// Destination gate is already serving another jump
    #[error("destination gate is busy")]
    DestinationBusy,
    /// The inbound tether to the destination was lost mid-charge
    #[error("link to destination was interrupted")]
    LinkInterrupted,
    /// Destination routing permissions changed mid-charge
    #[error("destination routing changed during charge")]
    DestinationRoutingChanged,
    /// Destination ceased to exist mid-charge
    #[error("destination voided during charge")]
    DestinationVoided,
    /// Target beacon is blocked for arrivals
    #[error("beacon is blocked")]
    BeaconBlocked,

    // Resource / geometry
    /// The jump could not be funded
    #[error("insufficient power")]
    InsufficientPower,
    /// Jump space overlaps another outbound gate's envelope
    #[error("jump space is transposed with another gate")]
    JumpSpaceTransposed,
    /// The concurrent-jump cap is reached
    #[error("subspace is busy")]
    SubspaceBusy,

    // Outcome
    /// The jump was cancelled
    #[error("jump cancelled")]
    Cancelled,
    /// Nothing was inside the jump space
    #[error("no entities in jump space")]
    NoEntities,
    /// Batches were found but none made it through
    #[error("no entities jumped")]
    NoEntitiesJumped,
    /// Cross-server routing is not available
    #[error("cross-server jump unavailable")]
    CrossServerUnavailable,
    /// Anything that escaped the coordinator's normal paths
    #[error("unknown error")]
    UnknownError,
}

impl JumpFailure {
    /// Which phase this failure is attributed to
    pub fn phase(self) -> FailurePhase {
        use JumpFailure::*;
        match self {
            SourceRoutingChanged
            | LinkInterrupted
            | DestinationRoutingChanged
            | DestinationVoided
            | Cancelled
            | NoEntities
            | NoEntitiesJumped
            | InsufficientPower
            | UnknownError => FailurePhase::PostCharge,
            _ => FailurePhase::Init,
        }
    }

    /// Whether this condition aborts a running charge as soon as the
    /// predicate observes it. Soft conditions (power availability,
    /// individual drives dropping while two remain working) are instead
    /// re-measured at transit time.
    pub fn aborts_charge(self) -> bool {
        use JumpFailure::*;
        matches!(
            self,
            SourceInvalid
                | SourceDisconnected
                | SourceDisabled
                | SourceRoutingChanged
                | SourceClosed
                | LinkInterrupted
                | DestinationRoutingChanged
                | DestinationVoided
                | BeaconBlocked
                | CrossServerUnavailable
                | Cancelled
        )
    }
}
