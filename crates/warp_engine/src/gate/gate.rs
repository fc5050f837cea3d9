//! The gate object and its lifecycle transitions

use serde::{Serialize, Deserialize};

use crate::foundation::math::{Transform, Vec3};
use crate::gate::{GateError, GatePhase, GateStatus, JumpEnvelope, WorldEnvelope};
use crate::drive::DriveId;
use crate::power::PowerSyphon;
use crate::world::{BlockId, ConstructKey, GridSize};

/// Gate identity: owning construct plus a small dense local id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateId {
    /// Owning construct
    pub construct: ConstructKey,
    /// Dense local id within the construct's gate registry
    pub local: u16,
}

/// Handle to a transient visual/audio effect owned by this gate
///
/// Ownership lives on the gate itself so effect cleanup happens with the
/// gate, never through a side table keyed by gate identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub u64);

/// A logical teleportation endpoint
///
/// Valid only while it has at least two drives and one intersection
/// node; the cluster pass disposes gates that fall below that.
#[derive(Debug, Clone)]
pub struct Gate {
    /// Gate identity
    pub id: GateId,

    /// Current role
    pub status: GateStatus,

    /// Current timeline phase
    pub phase: GatePhase,

    /// Grid-size class of the owning construct
    pub grid_size: GridSize,

    /// Jump node in construct-local space (centroid of intersection
    /// nodes); the world position is always derived, never stored
    pub local_node: Vec3,

    /// Construct-local jump envelope
    pub envelope: JumpEnvelope,

    /// Drives forming this gate
    pub drives: Vec<DriveId>,

    /// Accepted drive-pair intersection nodes, construct-local
    pub nodes: Vec<Vec3>,

    /// Corrected destination in world space; only set while outbound
    pub true_endpoint: Option<Vec3>,

    /// Attached controller block, if any
    pub controller: Option<BlockId>,

    /// Commanding antenna block, if any
    pub antenna: Option<BlockId>,

    /// The outbound gate currently tethered to this gate as its
    /// destination; a gate accepts at most one at a time
    pub sender_gate: Option<GateId>,

    /// In-progress power syphon, present only while one is running
    pub syphon: Option<PowerSyphon>,

    /// Transient effects owned by this gate
    pub effects: Vec<EffectHandle>,

    /// Masses (kg) of the batches resolved for the running transit;
    /// the authority keeps these out of client-bound snapshots
    pub batch_masses: Vec<f32>,

    /// Remaining auto-activation countdown, if configured
    pub auto_activation_remaining: Option<u32>,
}

impl Gate {
    /// Create a fresh gate in the unvalidated None/None state
    pub fn new(id: GateId, grid_size: GridSize) -> Self {
        Self {
            id,
            status: GateStatus::None,
            phase: GatePhase::None,
            grid_size,
            local_node: Vec3::zeros(),
            envelope: JumpEnvelope::degenerate(),
            drives: Vec::new(),
            nodes: Vec::new(),
            true_endpoint: None,
            controller: None,
            antenna: None,
            sender_gate: None,
            syphon: None,
            effects: Vec::new(),
            batch_masses: Vec::new(),
            auto_activation_remaining: None,
        }
    }

    /// Validity invariant: at least two drives and one intersection node
    pub fn is_valid(&self) -> bool {
        self.drives.len() >= 2 && !self.nodes.is_empty()
    }

    /// Whether the gate is at rest and can accept a jump
    pub fn is_idle(&self) -> bool {
        self.status == GateStatus::Idle && self.phase == GatePhase::Idle
    }

    /// Whether the gate has settled in a terminal resting state
    pub fn is_at_rest(&self) -> bool {
        self.is_idle() || (self.status == GateStatus::None && self.phase == GatePhase::None)
    }

    /// Re-derive Status/Phase from validity for a gate at rest
    pub fn refresh_validity(&mut self) {
        if self.is_valid() {
            if self.status == GateStatus::None {
                self.status = GateStatus::Idle;
                self.phase = GatePhase::Idle;
            }
        } else {
            self.status = GateStatus::None;
            self.phase = GatePhase::None;
        }
    }

    /// Enter the source side of a jump
    pub fn begin_outbound(&mut self) -> Result<(), GateError> {
        if !self.is_valid() {
            return Err(GateError::Invalid);
        }
        if !self.is_idle() {
            return Err(GateError::NotIdle);
        }
        self.status = GateStatus::Outbound;
        self.phase = GatePhase::Charging;
        Ok(())
    }

    /// Enter the destination side of a jump, tethered to `sender`
    ///
    /// A gate already serving as someone's destination refuses a second
    /// inbound connection.
    pub fn begin_inbound(&mut self, sender: GateId) -> Result<(), GateError> {
        if self.sender_gate.is_some() {
            return Err(GateError::Busy);
        }
        if !self.is_idle() {
            return Err(GateError::Busy);
        }
        self.status = GateStatus::Inbound;
        self.phase = GatePhase::Charging;
        self.sender_gate = Some(sender);
        Ok(())
    }

    /// Advance from charging into transit
    pub fn mark_jumping(&mut self) {
        self.phase = GatePhase::Jumping;
    }

    /// Cooperative cancellation: flips Status only, Phase keeps running
    /// until the charge timeline observes it
    pub fn cancel(&mut self) {
        self.status = GateStatus::Cancelled;
    }

    /// Begin winding the gate back to rest after a transit outcome
    pub fn begin_reset(&mut self) {
        self.status = GateStatus::Switching;
        self.phase = GatePhase::Resetting;
        self.true_endpoint = None;
        self.sender_gate = None;
        self.syphon = None;
        self.effects.clear();
        self.batch_masses.clear();
    }

    /// Settle into the terminal resting state
    pub fn finish_reset(&mut self) {
        if self.is_valid() {
            self.status = GateStatus::Idle;
            self.phase = GatePhase::Idle;
        } else {
            self.status = GateStatus::None;
            self.phase = GatePhase::None;
        }
    }

    /// Jump node resolved into world space
    pub fn world_node(&self, construct_transform: &Transform) -> Vec3 {
        construct_transform.transform_point(self.local_node)
    }

    /// Envelope resolved into world space
    pub fn world_envelope(&self, construct_transform: &Transform) -> WorldEnvelope {
        self.envelope.to_world(construct_transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn gate_id(local: u16) -> GateId {
        // Manufacture a real slotmap key for test identities
        let mut keys: SlotMap<ConstructKey, ()> = SlotMap::with_key();
        GateId {
            construct: keys.insert(()),
            local,
        }
    }

    fn valid_gate() -> Gate {
        let mut gate = Gate::new(gate_id(0), GridSize::Large);
        gate.drives = vec![DriveId(0), DriveId(1)];
        gate.nodes = vec![Vec3::zeros()];
        gate.refresh_validity();
        gate
    }

    #[test]
    fn two_drives_and_a_node_make_a_gate_valid() {
        let mut gate = Gate::new(gate_id(0), GridSize::Large);
        assert!(!gate.is_valid());
        gate.drives = vec![DriveId(0), DriveId(1)];
        assert!(!gate.is_valid());
        gate.nodes.push(Vec3::zeros());
        assert!(gate.is_valid());
        gate.refresh_validity();
        assert!(gate.is_idle());
    }

    #[test]
    fn dropping_below_two_drives_forces_disposal_state() {
        let mut gate = valid_gate();
        gate.drives.truncate(1);
        gate.refresh_validity();
        assert_eq!(gate.status, GateStatus::None);
        assert_eq!(gate.phase, GatePhase::None);
    }

    #[test]
    fn outbound_requires_idle() {
        let mut gate = valid_gate();
        assert!(gate.begin_outbound().is_ok());
        assert_eq!(gate.status, GateStatus::Outbound);
        assert_eq!(gate.phase, GatePhase::Charging);
        assert_eq!(gate.begin_outbound(), Err(GateError::NotIdle));
    }

    #[test]
    fn second_inbound_connection_is_refused() {
        let mut gate = valid_gate();
        assert!(gate.begin_inbound(gate_id(3)).is_ok());
        assert_eq!(gate.begin_inbound(gate_id(4)), Err(GateError::Busy));
    }

    #[test]
    fn cancel_leaves_phase_untouched() {
        let mut gate = valid_gate();
        gate.begin_outbound().unwrap();
        gate.cancel();
        assert_eq!(gate.status, GateStatus::Cancelled);
        assert_eq!(gate.phase, GatePhase::Charging);
    }

    #[test]
    fn reset_settles_in_terminal_state() {
        let mut gate = valid_gate();
        gate.begin_outbound().unwrap();
        gate.mark_jumping();
        gate.begin_reset();
        assert_eq!(gate.status, GateStatus::Switching);
        assert_eq!(gate.phase, GatePhase::Resetting);
        gate.finish_reset();
        assert!(gate.is_idle());

        // A gate invalidated mid-jump settles to None/None instead
        let mut broken = valid_gate();
        broken.begin_outbound().unwrap();
        broken.drives.clear();
        broken.begin_reset();
        broken.finish_reset();
        assert_eq!(broken.status, GateStatus::None);
        assert_eq!(broken.phase, GatePhase::None);
    }
}
