//! Charge phase polling
//!
//! While a gate charges, the coordinator polls one predicate per tick.
//! Hard conditions abort the charge immediately; soft conditions (power
//! levels, a drive dropping out while two remain) are tolerated here and
//! re-measured at transit time. The poll also feeds the physical charge
//! force into the source construct.

use crate::config::EngineSettings;
use crate::foundation::math::Vec3;
use crate::gate::{Gate, GateId, GateStatus, JumpControl, RoutingFlags, Waypoint};
use crate::jump::JumpFailure;
use crate::world::{Construct, WorldModel};

/// Outcome of one charge-predicate poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePoll {
    /// Conditions hold, keep charging
    Continue,
    /// A hard condition failed; the jump aborts with this reason
    Abort(JumpFailure),
}

/// The control surface currently commanding a gate, if any
pub fn control_for<'a>(construct: &'a Construct, gate: &Gate) -> Option<&'a dyn JumpControl> {
    if let Some(block) = gate.controller {
        if let Some(controller) = construct.controllers.get(&block) {
            return Some(controller);
        }
    }
    if let Some(block) = gate.antenna {
        if let Some(antenna) = construct.antennas.get(&block) {
            return Some(antenna);
        }
    }
    None
}

/// Live charge of a single jump transaction
///
/// Routing permissions are snapshotted at admission; a mismatch observed
/// by a later poll means someone reconfigured the gate mid-charge, which
/// aborts the jump rather than silently rerouting it.
#[derive(Debug)]
pub struct ChargeState {
    /// Outbound gate being charged
    pub source: GateId,
    /// Tethered destination gate, absent for untethered jumps
    pub target: Option<GateId>,
    /// Destination selected at admission
    pub waypoint: Waypoint,
    /// Charge duration in ticks
    pub duration_ticks: u32,
    /// Ticks elapsed so far
    pub ticks_elapsed: u32,
    /// Whether cancellation takes effect mid-charge
    pub immediate_cancel: bool,
    /// Cancellation observed but held until the charge completes
    pub cancel_pending: bool,
    source_routing: RoutingFlags,
    target_routing: Option<RoutingFlags>,
}

impl ChargeState {
    /// Snapshot the admission-time routing and start a charge
    pub fn new(
        source: GateId,
        target: Option<GateId>,
        waypoint: Waypoint,
        duration_ticks: u32,
        immediate_cancel: bool,
        source_routing: RoutingFlags,
        target_routing: Option<RoutingFlags>,
    ) -> Self {
        Self {
            source,
            target,
            waypoint,
            duration_ticks,
            ticks_elapsed: 0,
            immediate_cancel,
            cancel_pending: false,
            source_routing,
            target_routing,
        }
    }

    /// Whether the charge duration has fully elapsed
    pub fn is_complete(&self) -> bool {
        self.ticks_elapsed >= self.duration_ticks
    }

    /// Poll the charge conditions for one tick
    ///
    /// On `Continue` the elapsed counter advances and the charge force
    /// for this tick is accumulated on the source construct.
    pub fn poll(&mut self, world: &mut WorldModel, settings: &EngineSettings) -> ChargePoll {
        let force = match self.check(world) {
            Ok(force) => force * settings.charge_force_newtons,
            Err(failure) => return ChargePoll::Abort(failure),
        };

        if let Some(construct) = world.constructs.get_mut(self.source.construct) {
            construct.pending_force += force;
        }
        self.ticks_elapsed += 1;
        ChargePoll::Continue
    }

    /// Evaluate the hard conditions and compute the unit-scale charge
    /// force for this tick
    fn check(&mut self, world: &WorldModel) -> Result<Vec3, JumpFailure> {
        let construct = world
            .constructs
            .get(self.source.construct)
            .ok_or(JumpFailure::SourceClosed)?;
        let gate = construct
            .gates
            .get(self.source.local)
            .ok_or(JumpFailure::SourceClosed)?;

        if !gate.is_valid() || construct.drives.working_count_for_gate(self.source.local) < 2 {
            return Err(JumpFailure::SourceInvalid);
        }

        if gate.status == GateStatus::Cancelled {
            if self.immediate_cancel {
                return Err(JumpFailure::Cancelled);
            }
            // Deferred cancellation: the charge runs to completion and
            // the transaction fails only once the phase reaches Jumping
            self.cancel_pending = true;
        }

        let control = control_for(construct, gate).ok_or(JumpFailure::SourceDisconnected)?;
        if !control.enabled() {
            return Err(JumpFailure::SourceDisabled);
        }
        let node = gate.world_node(&construct.transform);
        if !control.connected_to(node) {
            return Err(JumpFailure::SourceDisconnected);
        }
        if control.settings().routing != self.source_routing {
            return Err(JumpFailure::SourceRoutingChanged);
        }

        self.check_destination(world)?;

        // Alternating pull/push on the jump node, summed over the gate's
        // working drives, expressed in world space
        let sign = if self.ticks_elapsed % 2 == 0 { 1.0 } else { -1.0 };
        let mut force = Vec3::zeros();
        for id in construct.drives.working_for_gate(self.source.local) {
            if let Some(drive) = construct.drives.get(id) {
                let toward_node = gate.local_node - drive.local_origin;
                let magnitude = toward_node.magnitude();
                if magnitude > f32::EPSILON {
                    force += toward_node / magnitude * sign;
                }
            }
        }
        Ok(construct.transform.transform_vector(force))
    }

    fn check_destination(&self, world: &WorldModel) -> Result<(), JumpFailure> {
        match self.waypoint {
            Waypoint::Gate(id) => {
                let construct = world
                    .constructs
                    .get(id.construct)
                    .ok_or(JumpFailure::DestinationVoided)?;
                let gate = construct
                    .gates
                    .get(id.local)
                    .ok_or(JumpFailure::DestinationVoided)?;
                if gate.sender_gate != Some(self.source) {
                    return Err(JumpFailure::LinkInterrupted);
                }
                // A degenerate target envelope is tolerated mid-charge;
                // the transit pass decides whether it recovered in time
                if let Some(control) = control_for(construct, gate) {
                    if Some(control.settings().routing) != self.target_routing {
                        return Err(JumpFailure::DestinationRoutingChanged);
                    }
                }
            }
            Waypoint::Beacon(id) => {
                let beacon = world
                    .beacons
                    .get(&id)
                    .ok_or(JumpFailure::DestinationVoided)?;
                if beacon.blocked {
                    return Err(JumpFailure::BeaconBlocked);
                }
            }
            Waypoint::Server(id) => {
                let server = world
                    .servers
                    .get(&id)
                    .ok_or(JumpFailure::CrossServerUnavailable)?;
                if !server.reachable {
                    return Err(JumpFailure::CrossServerUnavailable);
                }
            }
            Waypoint::Coordinate(_) | Waypoint::None => {}
        }
        Ok(())
    }
}
