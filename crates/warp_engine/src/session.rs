//! Session orchestration
//!
//! One `Session` owns the world, the jump coordinator, and the effect
//! registry for its lifetime; nothing engine-side is global. The tick
//! loop runs device upkeep and gate re-evaluation per construct, drives
//! the coordinator, publishes replication messages, and finishes with
//! the main pass that consumes deferred work and accumulated physics
//! forces.

use std::collections::{HashMap, HashSet};

use crate::cluster::reevaluate_gates;
use crate::config::EngineSettings;
use crate::foundation::math::Vec3;
use crate::foundation::time::{Tick, TickClock, TICK_RATE};
use crate::gate::{EffectHandle, GateId, Waypoint};
use crate::jump::{control_for, JumpCoordinator, JumpFailure, TimelinePlayer};
use crate::net::{
    ConstructSnapshot, EpochFilter, GateSnapshot, JumpEvent, MessageKind, NetMessage, PhaseFrame,
};
use crate::world::{ConstructKey, WorldModel};

/// Owns the transient visual/audio effects of a session
///
/// Gates hold their own effect handles; the registry only tracks which
/// handles are alive so orphans can be reclaimed after gate resets.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    next: u64,
    live: HashSet<EffectHandle>,
}

impl EffectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a live effect handle
    pub fn spawn(&mut self) -> EffectHandle {
        let handle = EffectHandle(self.next);
        self.next += 1;
        self.live.insert(handle);
        handle
    }

    /// Number of effects currently alive
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Release every handle not in the referenced set, returning how
    /// many were reclaimed
    pub fn sweep<I: IntoIterator<Item = EffectHandle>>(&mut self, referenced: I) -> usize {
        let keep: HashSet<EffectHandle> = referenced.into_iter().collect();
        let before = self.live.len();
        self.live.retain(|handle| keep.contains(handle));
        before - self.live.len()
    }
}

/// Work deferred to the end-of-tick main pass
enum MainPassOp {
    /// Force gate re-evaluation on a construct
    RecomputeGates(ConstructKey),
}

/// A running engine instance
pub struct Session {
    settings: EngineSettings,
    /// The simulated world
    pub world: WorldModel,
    /// Jump transaction coordinator
    pub coordinator: JumpCoordinator,
    /// Transient effect registry
    pub effects: EffectRegistry,
    timeline: Box<dyn TimelinePlayer>,
    clock: TickClock,
    epoch: u64,
    filter: EpochFilter,
    deferred: Vec<MainPassOp>,
    outbox: Vec<NetMessage>,
    last_endpoints: HashMap<GateId, Vec3>,
}

impl Session {
    /// Create a session with an empty world
    pub fn new(settings: EngineSettings, timeline: Box<dyn TimelinePlayer>) -> Self {
        Self {
            coordinator: JumpCoordinator::new(settings.clone()),
            settings,
            world: WorldModel::new(),
            effects: EffectRegistry::new(),
            timeline,
            clock: TickClock::new(),
            epoch: 0,
            filter: EpochFilter::new(),
            deferred: Vec::new(),
            outbox: Vec::new(),
            last_endpoints: HashMap::new(),
        }
    }

    /// Current simulation tick
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Take the replication messages produced since the last drain
    pub fn drain_outbox(&mut self) -> Vec<NetMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Request a jump from the given gate
    pub fn request_jump(&mut self, source: GateId) -> Result<(), JumpFailure> {
        let target = self.tethered_target(source);
        self.coordinator
            .request_jump(&mut self.world, self.timeline.as_mut(), source)?;
        let handle = self.effects.spawn();
        if let Some(gate) = self.world.gate_mut(source) {
            gate.effects.push(handle);
        }
        self.broadcast(MessageKind::JumpEvent {
            gate: source,
            event: JumpEvent::Started { target },
        });
        Ok(())
    }

    /// Request cancellation of the jump running on the given gate
    pub fn cancel_jump(&mut self, source: GateId) {
        self.coordinator.cancel_jump(&mut self.world, source);
    }

    /// Feed an inbound replication message through the epoch filter
    pub fn handle_message(&mut self, message: NetMessage) {
        if !self.filter.accept(&message) {
            log::debug!("dropped stale message on {:?}", message.channel());
            return;
        }
        match (message.phase_frame, message.kind) {
            // A broadcast from a remote authority overwrites the local
            // replicable state of the construct it names
            (PhaseFrame::Broadcast, MessageKind::ConstructSnapshot(snapshot)) => {
                if let Some(construct) = self.world.constructs.get_mut(snapshot.key) {
                    snapshot.apply(construct);
                }
            }
            (PhaseFrame::Request, MessageKind::DebugRecompute { construct }) => {
                self.deferred.push(MainPassOp::RecomputeGates(construct));
            }
            (
                PhaseFrame::Request,
                MessageKind::JumpEvent {
                    gate,
                    event: JumpEvent::Started { .. },
                },
            ) => {
                let _ = self.request_jump(gate);
            }
            _ => {}
        }
    }

    /// Advance the session by one tick
    pub fn tick(&mut self) {
        self.clock.advance();

        let keys: Vec<ConstructKey> = self.world.constructs.keys().collect();
        for key in keys {
            self.upkeep_construct(key);
        }

        self.auto_activation();
        self.coordinator
            .tick(&mut self.world, self.timeline.as_mut());
        self.publish_reports();
        self.publish_endpoints();
        self.main_pass();
        self.sweep_effects();
    }

    /// Device upkeep and gate re-evaluation for one construct
    fn upkeep_construct(&mut self, key: ConstructKey) {
        let (removed, snapshots, construct_snapshot) = {
            let Some(construct) = self.world.constructs.get_mut(key) else {
                return;
            };
            for drive in construct.drives.iter_mut() {
                drive.recharge_tick();
            }
            if !construct.drives.take_dirty() {
                return;
            }

            let report = reevaluate_gates(key, construct, &self.settings);

            // Compact local ids and fix the drives pointing at moved
            // gates. Local ids key live transactions, so compaction
            // waits until every gate is back at rest.
            let settled = construct.gates.iter().all(|gate| gate.is_at_rest());
            if settled {
                let moves: HashMap<u16, u16> = construct.gates.remap().into_iter().collect();
                if !moves.is_empty() {
                    for drive in construct.drives.iter_mut() {
                        if let Some(old) = drive.gate {
                            if let Some(&new) = moves.get(&old) {
                                drive.gate = Some(new);
                            }
                        }
                    }
                }
            }

            let transform = construct.transform.clone();
            let snapshots: Vec<GateSnapshot> = construct
                .gates
                .iter()
                .map(|gate| GateSnapshot::capture(gate, &transform))
                .collect();
            (
                report.removed,
                snapshots,
                ConstructSnapshot::capture(key, construct),
            )
        };

        for local in removed {
            self.broadcast(MessageKind::JumpEvent {
                gate: GateId { construct: key, local },
                event: JumpEvent::Closed,
            });
        }
        for snapshot in snapshots {
            self.broadcast(MessageKind::GateSnapshot(snapshot));
        }
        self.broadcast(MessageKind::ConstructSnapshot(construct_snapshot));
    }

    /// Advance auto-activation countdowns and fire the jumps that hit
    /// zero
    fn auto_activation(&mut self) {
        let mut pending: Vec<(GateId, Option<u32>)> = Vec::new();
        for (_, construct) in self.world.constructs.iter() {
            for gate in construct.gates.iter() {
                let ticks = control_for(construct, gate)
                    .and_then(|control| control.settings().auto_activation_ticks);
                pending.push((gate.id, ticks));
            }
        }

        let mut to_jump: Vec<GateId> = Vec::new();
        let mut countdowns: Vec<(GateId, u32)> = Vec::new();
        for (id, ticks) in pending {
            let Some(gate) = self.world.gate_mut(id) else {
                continue;
            };
            match ticks {
                Some(start) if gate.is_idle() => {
                    let remaining = gate.auto_activation_remaining.get_or_insert(start);
                    if *remaining == 0 {
                        gate.auto_activation_remaining = None;
                        to_jump.push(id);
                    } else {
                        *remaining -= 1;
                        let left = *remaining;
                        if left % TICK_RATE == 0 {
                            countdowns.push((id, left));
                        }
                    }
                }
                _ => gate.auto_activation_remaining = None,
            }
        }

        for (gate, remaining_ticks) in countdowns {
            self.broadcast(MessageKind::AutoActivation {
                gate,
                remaining_ticks,
            });
        }
        for id in to_jump {
            log::info!("gate {} auto-activating", id.local);
            let _ = self.request_jump(id);
        }
    }

    /// Turn finished transactions into broadcast events
    fn publish_reports(&mut self) {
        for report in self.coordinator.drain_reports() {
            let event = match &report.outcome {
                Ok(summary) => JumpEvent::Succeeded {
                    jumped: summary.jumped,
                    total: summary.total,
                    warps: summary.warps,
                },
                Err(failure) => JumpEvent::Failed {
                    reason: *failure,
                    phase: failure.phase(),
                },
            };
            self.broadcast(MessageKind::JumpEvent {
                gate: report.source,
                event,
            });
        }
    }

    /// Broadcast corrected endpoints of outbound gates when they change
    fn publish_endpoints(&mut self) {
        let mut current: HashMap<GateId, Vec3> = HashMap::new();
        for (_, construct) in self.world.constructs.iter() {
            for gate in construct.gates.iter() {
                if let Some(endpoint) = gate.true_endpoint {
                    current.insert(gate.id, endpoint);
                }
            }
        }

        let mut changed: Vec<(GateId, Vec3)> = current
            .iter()
            .filter(|(id, endpoint)| self.last_endpoints.get(id) != Some(endpoint))
            .map(|(id, endpoint)| (*id, *endpoint))
            .collect();
        changed.sort_by_key(|(id, _)| id.local);
        for (gate, endpoint) in changed {
            self.broadcast(MessageKind::TrueEndpoint { gate, endpoint });
        }
        self.last_endpoints = current;
    }

    /// End-of-tick main pass: deferred operations and physics forces
    fn main_pass(&mut self) {
        for op in std::mem::take(&mut self.deferred) {
            match op {
                MainPassOp::RecomputeGates(key) => {
                    if let Some(construct) = self.world.constructs.get_mut(key) {
                        construct.drives.mark_dirty();
                    }
                }
            }
        }

        for (_, construct) in self.world.constructs.iter_mut() {
            if construct.pending_force.magnitude() > f32::EPSILON
                && construct.mass_kg > f32::EPSILON
            {
                construct.velocity +=
                    construct.pending_force / construct.mass_kg / TICK_RATE as f32;
            }
            construct.pending_force = Vec3::zeros();
        }
    }

    /// Reclaim effect handles orphaned by gate resets and disposals
    fn sweep_effects(&mut self) {
        let referenced: Vec<EffectHandle> = self
            .world
            .constructs
            .iter()
            .flat_map(|(_, c)| c.gates.iter())
            .flat_map(|g| g.effects.iter().copied())
            .collect();
        let reclaimed = self.effects.sweep(referenced);
        if reclaimed > 0 {
            log::debug!("reclaimed {reclaimed} orphaned effects");
        }
    }

    fn tethered_target(&self, source: GateId) -> Option<GateId> {
        let construct = self.world.constructs.get(source.construct)?;
        let gate = construct.gates.get(source.local)?;
        match control_for(construct, gate)?.settings().waypoint {
            Waypoint::Gate(id) => Some(id),
            _ => None,
        }
    }

    fn broadcast(&mut self, kind: MessageKind) {
        self.epoch += 1;
        self.outbox.push(NetMessage {
            epoch: self.epoch,
            phase_frame: PhaseFrame::Broadcast,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveId;
    use crate::foundation::math::Transform;
    use crate::gate::{ControllerBlock, ControllerSettings, GateStatus};
    use crate::jump::ScriptedTimeline;
    use crate::world::{Capacitor, Construct, GridSize};

    fn session() -> Session {
        let settings = EngineSettings {
            charge_duration_ticks: 3,
            spread_ratio: 0.0,
            ..EngineSettings::default()
        };
        Session::new(settings, Box::new(ScriptedTimeline::instant()))
    }

    fn rig(session: &mut Session, position: Vec3) -> GateId {
        let mut construct =
            Construct::new("session rig", GridSize::Large, Transform::from_position(position));
        construct.add_block((0, 0, -4), 50_000.0);
        construct.drives.add(
            Vec3::new(-10.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::z(),
            100.0,
        );
        construct.drives.add(
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::z(),
            100.0,
        );
        let key = session.world.spawn_construct(construct);
        // First tick runs the re-cluster pass and forms the gate
        session.tick();
        let construct = session.world.constructs.get_mut(key).unwrap();
        let local = construct.gates.ids()[0];
        let block = construct.allocate_block_id();
        construct.controllers.insert(
            block,
            ControllerBlock {
                block,
                enabled: true,
                settings: ControllerSettings {
                    waypoint: Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0)),
                    ..ControllerSettings::default()
                },
            },
        );
        construct.gates.get_mut(local).unwrap().controller = Some(block);
        GateId { construct: key, local }
    }

    #[test]
    fn reclustering_broadcasts_gate_snapshots() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        let messages = session.drain_outbox();
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::GateSnapshot(snapshot) if snapshot.id.local == gate.local
        )));
        // The construct's own replicable state goes out alongside
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::ConstructSnapshot(snapshot) if snapshot.key == gate.construct
        )));
        // Epochs are strictly increasing
        let epochs: Vec<u64> = messages.iter().map(|m| m.epoch).collect();
        let mut sorted = epochs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(epochs.len(), sorted.len());
    }

    #[test]
    fn charge_force_moves_the_construct() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        session.request_jump(gate).unwrap();
        session.tick();
        let construct = session.world.constructs.get(gate.construct).unwrap();
        // The node sits at +z from the drives, so the first pull tick
        // pushes the construct toward it
        assert!(construct.velocity.z > 0.0);
        assert_eq!(construct.pending_force, Vec3::zeros());
    }

    #[test]
    fn effects_are_reclaimed_after_the_jump_resolves() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        session.request_jump(gate).unwrap();
        assert_eq!(session.effects.live_count(), 1);
        assert_eq!(session.world.gate(gate).unwrap().effects.len(), 1);

        for _ in 0..4 {
            session.tick();
        }
        // Jump resolved (no entities in the empty envelope); the reset
        // cleared the gate's effects and the sweep reclaimed them
        assert!(session.world.gate(gate).unwrap().is_idle());
        assert_eq!(session.effects.live_count(), 0);
    }

    #[test]
    fn jump_outcome_is_broadcast() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        session.drain_outbox();
        session.request_jump(gate).unwrap();
        for _ in 0..4 {
            session.tick();
        }
        let messages = session.drain_outbox();
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::JumpEvent { event: JumpEvent::Started { .. }, .. }
        )));
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::JumpEvent {
                event: JumpEvent::Failed { reason: JumpFailure::NoEntities, .. },
                ..
            }
        )));
        // The corrected endpoint went out while the gate was outbound
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::TrueEndpoint { .. }
        )));
    }

    #[test]
    fn auto_activation_countdown_fires_a_jump() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        {
            let construct = session.world.constructs.get_mut(gate.construct).unwrap();
            for controller in construct.controllers.values_mut() {
                controller.settings.auto_activation_ticks = Some(2);
            }
        }
        session.drain_outbox();

        // Two countdown ticks, then the activation tick
        for _ in 0..3 {
            session.tick();
        }
        let messages = session.drain_outbox();
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::JumpEvent { event: JumpEvent::Started { .. }, .. }
        )));
    }

    #[test]
    fn debug_recompute_request_rebuilds_a_desynced_gate() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());

        // Simulate a desync by dropping the gate behind the engine's back
        session
            .world
            .constructs
            .get_mut(gate.construct)
            .unwrap()
            .gates
            .remove(gate.local);
        assert!(session.world.gate(gate).is_none());

        session.handle_message(NetMessage {
            epoch: 1,
            phase_frame: PhaseFrame::Request,
            kind: MessageKind::DebugRecompute {
                construct: gate.construct,
            },
        });
        session.tick(); // main pass marks the drives dirty
        session.tick(); // upkeep re-evaluates and recreates the gate
        assert!(session.world.gate(gate).is_some());
    }

    #[test]
    fn stale_requests_are_ignored() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        session.drain_outbox();

        let request = |epoch| NetMessage {
            epoch,
            phase_frame: PhaseFrame::Request,
            kind: MessageKind::JumpEvent {
                gate,
                event: JumpEvent::Started { target: None },
            },
        };
        session.handle_message(request(5));
        assert_eq!(session.coordinator.active_jumps(), 1);
        // An older epoch on the same channel cannot start another jump
        session.handle_message(request(3));
        assert_eq!(session.coordinator.active_jumps(), 1);
        // Neither can a replayed duplicate of the accepted epoch
        session.handle_message(request(5));
        assert_eq!(session.coordinator.active_jumps(), 1);
    }

    #[test]
    fn disposing_a_sibling_gate_mid_charge_leaves_the_jump_intact() {
        let mut session = session();
        let mut construct = Construct::new("twin rig", GridSize::Large, Transform::identity());
        construct.add_block((0, 0, -4), 50_000.0);
        // Two disjoint converging pairs, far enough apart that the
        // clusters never mix
        for y in [0.0, 500.0] {
            construct.drives.add(
                Vec3::new(-10.0, y, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::z(),
                100.0,
            );
            construct.drives.add(
                Vec3::new(10.0, y, 0.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::z(),
                100.0,
            );
        }
        let key = session.world.spawn_construct(construct);
        session.tick();

        let charging = {
            let construct = session.world.constructs.get_mut(key).unwrap();
            assert_eq!(construct.gates.ids(), vec![0, 1]);
            let block = construct.allocate_block_id();
            construct.controllers.insert(
                block,
                ControllerBlock {
                    block,
                    enabled: true,
                    settings: ControllerSettings {
                        waypoint: Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0)),
                        ..ControllerSettings::default()
                    },
                },
            );
            construct.gates.get_mut(1).unwrap().controller = Some(block);
            GateId { construct: key, local: 1 }
        };
        session.request_jump(charging).unwrap();

        // Dispose the idle sibling's drives while the jump is charging
        {
            let construct = session.world.constructs.get_mut(key).unwrap();
            let doomed: Vec<DriveId> = construct
                .drives
                .iter()
                .filter(|d| d.gate == Some(0))
                .map(|d| d.id)
                .collect();
            for id in doomed {
                construct.drives.remove(id);
            }
        }
        session.tick();

        // The survivor keeps its local id and its running charge;
        // compaction waits until the gate is back at rest
        let construct = session.world.constructs.get(key).unwrap();
        assert_eq!(construct.gates.ids(), vec![1]);
        assert_eq!(
            session.world.gate(charging).unwrap().status,
            GateStatus::Outbound
        );

        for _ in 0..4 {
            session.tick();
        }
        assert!(session.world.gate(charging).unwrap().is_idle());
        let messages = session.drain_outbox();
        // The jump resolved on the empty envelope instead of aborting on
        // a closed source
        assert!(messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::JumpEvent {
                event: JumpEvent::Failed { reason: JumpFailure::NoEntities, .. },
                ..
            }
        )));
        assert!(!messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::JumpEvent {
                event: JumpEvent::Failed { reason: JumpFailure::SourceClosed, .. },
                ..
            }
        )));
    }

    #[test]
    fn broadcast_construct_snapshots_overwrite_local_state() {
        let mut session = session();
        let gate = rig(&mut session, Vec3::zeros());
        let key = gate.construct;
        let snapshot = {
            let construct = session.world.constructs.get(key).unwrap();
            ConstructSnapshot::capture(key, construct)
        };

        // Desync the local copy
        {
            let construct = session.world.constructs.get_mut(key).unwrap();
            construct.transform = Transform::from_position(Vec3::new(999.0, 0.0, 0.0));
            construct.capacitors.push(Capacitor::new(50.0));
        }

        session.handle_message(NetMessage {
            epoch: 99,
            phase_frame: PhaseFrame::Broadcast,
            kind: MessageKind::ConstructSnapshot(snapshot.clone()),
        });
        let construct = session.world.constructs.get(key).unwrap();
        assert_eq!(construct.transform, snapshot.transform);
        assert_eq!(construct.capacitors, snapshot.capacitors);
        assert_eq!(construct.gates.ids(), vec![gate.local]);
    }
}
