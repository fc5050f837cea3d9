//! Jump transaction coordination
//!
//! One transaction per outbound gate: a single-tick precheck, a
//! multi-tick charge polled once per tick, and a transit pass that
//! resolves batches, funds them, and moves them. Every admitted
//! transaction, whatever its fate, leaves both gates in a terminal
//! resting state through the single result-emission routine.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::batch::{BatchResolver, BatchRoot, EntityBatch};
use crate::config::EngineSettings;
use crate::drive::Drive;
use crate::foundation::math::{Quat, Vec3};
use crate::gate::{
    ControllerSettings, GateId, GateStatus, RoutingFlags, Waypoint, WorldEnvelope,
};
use crate::jump::charge::{control_for, ChargePoll, ChargeState};
use crate::jump::{JumpFailure, TimelineOutcome, TimelinePlayer};
use crate::power::PowerSyphon;
use crate::world::{ConstructKey, EntityKey, WorldModel};

/// What a completed transit moved, skipped, and excluded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitSummary {
    /// Batches that made it through (teleported or warping)
    pub jumped: usize,
    /// Batches skipped by the resolver (obstruction, fit, filters)
    pub skipped: usize,
    /// Batches excluded for lack of power
    pub excluded: usize,
    /// Batches cleared for transit by the resolver
    pub total: usize,
    /// Batches still warping when the result was emitted
    pub warps: usize,
}

/// Final record of one jump transaction
#[derive(Debug)]
pub struct JumpReport {
    /// Outbound gate the transaction belonged to
    pub source: GateId,
    /// What happened
    pub outcome: Result<TransitSummary, JumpFailure>,
    /// Whether the gate phase reached Jumping before the outcome
    pub reached_transit: bool,
    /// User-facing summary line
    pub message: String,
}

/// Everything the precheck established about an admissible jump
struct PrecheckPass {
    target: Option<GateId>,
    waypoint: Waypoint,
    controller: ControllerSettings,
    source_routing: RoutingFlags,
    target_routing: Option<RoutingFlags>,
}

/// A batch waiting on a smoothed syphon
struct DeferredBatch {
    batch: EntityBatch,
    syphon: PowerSyphon,
}

/// Transit stage: funded batches are already gone, the rest queue on
/// the gate's syphon one at a time
struct TransitState {
    summary: TransitSummary,
    relative: Quat,
    deferred: VecDeque<DeferredBatch>,
    active: Option<EntityBatch>,
}

enum Stage {
    Charging(ChargeState),
    Transit(TransitState),
}

struct JumpTransaction {
    source: GateId,
    target: Option<GateId>,
    waypoint: Waypoint,
    controller: ControllerSettings,
    rng: StdRng,
    stage: Stage,
}

/// A batch traveling between envelopes over several ticks
struct WarpInFlight {
    constructs: Vec<(ConstructKey, Vec3, Vec3)>,
    entities: Vec<(EntityKey, Vec3, Vec3)>,
    relative: Quat,
    remaining: u32,
    total: u32,
}

enum Step {
    Keep,
    Enter(TransitState),
    Finish(Result<TransitSummary, JumpFailure>, bool),
}

enum SyphonStep {
    Running,
    Done(bool),
}

/// Drives all active jump transactions through their phases
pub struct JumpCoordinator {
    settings: EngineSettings,
    transactions: Vec<JumpTransaction>,
    warps: Vec<WarpInFlight>,
    active_jumps: u32,
    reports: Vec<JumpReport>,
    next_seed: u64,
}

impl JumpCoordinator {
    /// Create a coordinator with the given settings
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            transactions: Vec::new(),
            warps: Vec::new(),
            active_jumps: 0,
            reports: Vec::new(),
            next_seed: 0,
        }
    }

    /// Number of admitted transactions still running
    pub fn active_jumps(&self) -> u32 {
        self.active_jumps
    }

    /// Number of batches currently warping between envelopes
    pub fn warps_in_flight(&self) -> usize {
        self.warps.len()
    }

    /// Take the reports accumulated since the last drain
    pub fn drain_reports(&mut self) -> Vec<JumpReport> {
        std::mem::take(&mut self.reports)
    }

    /// Attempt to start a jump from the given gate
    ///
    /// On success the source gate is Outbound/Charging, a tethered
    /// destination is Inbound/Charging, and the timeline player has been
    /// handed the charge. Failures are reported and leave both gates
    /// untouched.
    pub fn request_jump(
        &mut self,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
        source: GateId,
    ) -> Result<(), JumpFailure> {
        let admitted = self
            .precheck(world, source)
            .and_then(|pass| self.admit(world, timeline, source, pass));
        if let Err(failure) = admitted {
            log::warn!("gate {} jump rejected: {failure}", source.local);
            timeline.play_outcome(source, TimelineOutcome::Failure);
            self.reports.push(JumpReport {
                source,
                outcome: Err(failure),
                reached_transit: false,
                message: format!("jump failed: {failure}"),
            });
            return Err(failure);
        }
        Ok(())
    }

    /// Request cancellation of the jump running on the given gate
    ///
    /// Cooperative: only the Status flips here; the charge predicate
    /// decides when the cancellation takes effect.
    pub fn cancel_jump(&mut self, world: &mut WorldModel, source: GateId) {
        if self.transactions.iter().any(|t| t.source == source) {
            if let Some(gate) = world.gate_mut(source) {
                gate.cancel();
            }
        }
    }

    /// Advance every transaction and warp by one tick
    pub fn tick(&mut self, world: &mut WorldModel, timeline: &mut dyn TimelinePlayer) {
        let mut transactions = std::mem::take(&mut self.transactions);
        transactions.retain_mut(|txn| !self.advance(txn, world, timeline));
        self.transactions = transactions;
        self.advance_warps(world);
    }

    fn precheck(&self, world: &WorldModel, source: GateId) -> Result<PrecheckPass, JumpFailure> {
        let construct = world
            .constructs
            .get(source.construct)
            .ok_or(JumpFailure::SourceClosed)?;
        let gate = construct
            .gates
            .get(source.local)
            .ok_or(JumpFailure::SourceClosed)?;

        if !gate.is_valid() {
            return Err(JumpFailure::SourceInvalid);
        }
        if !gate.is_idle() || gate.sender_gate.is_some() {
            return Err(JumpFailure::SourceBusy);
        }

        let control = control_for(construct, gate).ok_or(JumpFailure::SourceUnconfigured)?;
        if !control.enabled() {
            return Err(JumpFailure::SourceDisabled);
        }
        let node = gate.world_node(&construct.transform);
        if !control.connected_to(node) {
            return Err(JumpFailure::SourceDisconnected);
        }
        if construct.drives.working_count_for_gate(source.local) < 2 {
            return Err(JumpFailure::SourceInvalid);
        }

        let controller = control.settings().clone();
        if !controller.routing.contains(RoutingFlags::OUTBOUND) {
            return Err(if controller.routing.contains(RoutingFlags::INBOUND) {
                JumpFailure::SourceInboundOnly
            } else {
                JumpFailure::SourceRoutingDisabled
            });
        }

        let source_env = gate.world_envelope(&construct.transform);
        if source_env.is_degenerate() {
            return Err(JumpFailure::SourceInvalid);
        }

        let mut target = None;
        let mut target_routing = None;
        match controller.waypoint {
            Waypoint::None => return Err(JumpFailure::SourceUnconfigured),
            Waypoint::Gate(id) => {
                if id == source {
                    return Err(JumpFailure::DestinationForbidden);
                }
                let other = world
                    .constructs
                    .get(id.construct)
                    .ok_or(JumpFailure::DestinationUnavailable)?;
                let other_gate = other
                    .gates
                    .get(id.local)
                    .ok_or(JumpFailure::DestinationUnavailable)?;
                if !other_gate.is_valid() {
                    return Err(JumpFailure::DestinationUnavailable);
                }
                let other_control =
                    control_for(other, other_gate).ok_or(JumpFailure::DestinationUnconfigured)?;
                if !other_control.enabled() {
                    return Err(JumpFailure::DestinationDisabled);
                }
                let routing = other_control.settings().routing;
                if !routing.contains(RoutingFlags::INBOUND) {
                    return Err(if routing.contains(RoutingFlags::OUTBOUND) {
                        JumpFailure::DestinationOutboundOnly
                    } else {
                        JumpFailure::DestinationRoutingDisabled
                    });
                }
                if !other_gate.is_idle() || other_gate.sender_gate.is_some() {
                    return Err(JumpFailure::DestinationBusy);
                }
                if other_gate.world_envelope(&other.transform).is_degenerate() {
                    return Err(JumpFailure::DestinationUnavailable);
                }
                target = Some(id);
                target_routing = Some(routing);
            }
            Waypoint::Beacon(id) => {
                let beacon = world
                    .beacons
                    .get(&id)
                    .ok_or(JumpFailure::DestinationUnavailable)?;
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
            Waypoint::Coordinate(_) => {}
        }

        if self.active_jumps >= self.settings.max_concurrent_jumps {
            return Err(JumpFailure::SubspaceBusy);
        }

        // No two outbound jump spaces may overlap
        let target_env = target.and_then(|id| world.gate_world_envelope(id));
        for (key, other) in world.constructs.iter() {
            for other_gate in other.gates.iter() {
                if key == source.construct && other_gate.id.local == source.local {
                    continue;
                }
                if other_gate.status != GateStatus::Outbound {
                    continue;
                }
                let env = other_gate.world_envelope(&other.transform);
                if env.intersects(&source_env) {
                    return Err(JumpFailure::JumpSpaceTransposed);
                }
                if let Some(tenv) = &target_env {
                    if env.intersects(tenv) {
                        return Err(JumpFailure::JumpSpaceTransposed);
                    }
                }
            }
        }

        let source_routing = controller.routing;
        let waypoint = controller.waypoint;
        Ok(PrecheckPass {
            target,
            waypoint,
            controller,
            source_routing,
            target_routing,
        })
    }

    fn admit(
        &mut self,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
        source: GateId,
        pass: PrecheckPass,
    ) -> Result<(), JumpFailure> {
        {
            let gate = world.gate_mut(source).ok_or(JumpFailure::SourceClosed)?;
            gate.begin_outbound().map_err(|_| JumpFailure::SourceBusy)?;
        }
        if let Some(target) = pass.target {
            let tethered = world
                .gate_mut(target)
                .ok_or(JumpFailure::DestinationVoided)
                .and_then(|g| g.begin_inbound(source).map_err(|_| JumpFailure::DestinationBusy));
            if let Err(failure) = tethered {
                if let Some(gate) = world.gate_mut(source) {
                    gate.begin_reset();
                    gate.finish_reset();
                }
                return Err(failure);
            }
        }

        // First endpoint estimate; the transit pass corrects it
        let estimate = match pass.waypoint {
            Waypoint::Coordinate(p) => Some(p),
            Waypoint::Beacon(id) => world.beacons.get(&id).map(|b| b.position),
            Waypoint::Server(id) => world.servers.get(&id).map(|s| s.arrival),
            Waypoint::Gate(id) => world.gate_world_node(id),
            Waypoint::None => None,
        };
        if let Some(gate) = world.gate_mut(source) {
            gate.true_endpoint = estimate;
        }

        timeline.play_charge(source, pass.target, self.settings.charge_duration_ticks);
        log::info!(
            "gate {} charging for {} ticks",
            source.local,
            self.settings.charge_duration_ticks
        );

        let seed = self.next_seed;
        self.next_seed = self.next_seed.wrapping_add(1);
        let charge = ChargeState::new(
            source,
            pass.target,
            pass.waypoint,
            self.settings.charge_duration_ticks,
            pass.controller.immediate_cancel,
            pass.source_routing,
            pass.target_routing,
        );
        self.transactions.push(JumpTransaction {
            source,
            target: pass.target,
            waypoint: pass.waypoint,
            controller: pass.controller,
            rng: StdRng::seed_from_u64(seed),
            stage: Stage::Charging(charge),
        });
        self.active_jumps += 1;
        Ok(())
    }

    /// Advance one transaction; returns true when it finished
    fn advance(
        &mut self,
        txn: &mut JumpTransaction,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
    ) -> bool {
        let step = match &mut txn.stage {
            Stage::Charging(charge) => match charge.poll(world, &self.settings) {
                ChargePoll::Abort(failure) => Step::Finish(Err(failure), false),
                ChargePoll::Continue if !charge.is_complete() => Step::Keep,
                ChargePoll::Continue => {
                    if let Some(gate) = world.gate_mut(txn.source) {
                        gate.mark_jumping();
                    }
                    if let Some(target) = txn.target {
                        if let Some(gate) = world.gate_mut(target) {
                            gate.mark_jumping();
                        }
                    }
                    if charge.cancel_pending {
                        Step::Finish(Err(JumpFailure::Cancelled), true)
                    } else {
                        let (source, target, waypoint) = (txn.source, txn.target, txn.waypoint);
                        let controller = txn.controller.clone();
                        let rng = &mut txn.rng;
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            self.execute_transit(world, timeline, source, target, waypoint, &controller, rng)
                        }))
                        .unwrap_or(Err(JumpFailure::UnknownError));
                        match outcome {
                            Err(failure) => Step::Finish(Err(failure), true),
                            Ok(state) if state.deferred.is_empty() && state.active.is_none() => {
                                Step::Finish(conclude(state.summary), true)
                            }
                            Ok(state) => Step::Enter(state),
                        }
                    }
                }
            },
            Stage::Transit(state) => self.advance_syphon(txn.source, state, world, timeline),
        };

        match step {
            Step::Keep => false,
            Step::Enter(state) => {
                txn.stage = Stage::Transit(state);
                false
            }
            Step::Finish(outcome, reached_transit) => {
                self.emit_result(world, timeline, txn.source, txn.target, outcome, reached_transit);
                true
            }
        }
    }

    /// Run the transit once the charge completed: resolve batches, fund
    /// them, and move the funded ones
    fn execute_transit(
        &mut self,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
        source: GateId,
        target: Option<GateId>,
        waypoint: Waypoint,
        controller: &ControllerSettings,
        rng: &mut StdRng,
    ) -> Result<TransitState, JumpFailure> {
        let source_env = world
            .gate_world_envelope(source)
            .ok_or(JumpFailure::SourceClosed)?;
        let (arrival, tethered) = match target {
            Some(id) => {
                let env = world
                    .gate_world_envelope(id)
                    .ok_or(JumpFailure::DestinationVoided)?;
                // Tolerated mid-charge, decisive now
                if env.is_degenerate() {
                    return Err(JumpFailure::DestinationUnavailable);
                }
                (env, true)
            }
            None => (
                self.untethered_frame(world, controller, &source_env, waypoint, rng)?,
                false,
            ),
        };

        // The effective jump space of a tethered pair is the overlap of
        // both envelopes
        let effective = if tethered {
            source_env.clamped_to(&arrival)
        } else {
            source_env.clone()
        };
        if let Some(gate) = world.gate_mut(source) {
            gate.true_endpoint = Some(arrival.center);
        }

        let report = BatchResolver {
            world,
            settings: &self.settings,
            controller,
            source_construct: source.construct,
            source: effective,
            target: arrival.clone(),
        }
        .resolve();
        let mut batches = report.batches;
        if batches.is_empty() {
            return Err(if report.skipped == 0 {
                JumpFailure::NoEntities
            } else {
                JumpFailure::NoEntitiesJumped
            });
        }

        // Unconfined spread: every batch draws its own arrival scatter
        if !tethered && !self.settings.confine_spread {
            let distance = (arrival.center - source_env.center).magnitude();
            for batch in &mut batches {
                let offset = spread_offset(rng, distance, self.settings.spread_ratio);
                batch.destination.position += offset;
                batch.obstruction.min += offset;
                batch.obstruction.max += offset;
            }
        }

        if let Some(gate) = world.gate_mut(source) {
            gate.batch_masses = batches.iter().map(|b| b.mass_kg).collect();
        }

        let relative = arrival.rotation() * source_env.rotation().inverse();
        let mut state = TransitState {
            summary: TransitSummary {
                total: batches.len(),
                skipped: report.skipped,
                ..Default::default()
            },
            relative,
            deferred: VecDeque::new(),
            active: None,
        };

        for batch in batches {
            let cost_mw = batch.mass_kg / 1000.0 * self.settings.power_per_tonne_mw;
            let mut syphon = PowerSyphon::new(cost_mw, self.settings.syphon_tick_budget);
            if let Some(construct) = world.constructs.get_mut(source.construct) {
                let local = source.local;
                let mut drives: Vec<&mut Drive> = construct
                    .drives
                    .iter_mut()
                    .filter(|d| d.working && d.gate == Some(local))
                    .collect();
                syphon.drain_instant(&mut drives, &mut construct.capacitors);
            }
            if syphon.is_funded() {
                self.perform_transit(world, timeline, batch, relative, &mut state.summary);
            } else if self.settings.allow_reactor_syphon {
                state.deferred.push_back(DeferredBatch { batch, syphon });
            } else {
                state.summary.excluded += 1;
            }
        }
        Ok(state)
    }

    /// Advance the gate syphon funding the current deferred batch
    fn advance_syphon(
        &mut self,
        source: GateId,
        state: &mut TransitState,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
    ) -> Step {
        if state.active.is_none() {
            if let Some(deferred) = state.deferred.pop_front() {
                if let Some(gate) = world.gate_mut(source) {
                    gate.syphon = Some(deferred.syphon);
                }
                state.active = Some(deferred.batch);
            }
        }

        if state.active.is_some() {
            let step = {
                let Some(construct) = world.constructs.get_mut(source.construct) else {
                    return Step::Finish(Err(JumpFailure::SourceClosed), true);
                };
                let local = source.local;
                let Some(gate) = construct.gates.get_mut(local) else {
                    return Step::Finish(Err(JumpFailure::SourceClosed), true);
                };
                match gate.syphon.as_mut() {
                    Some(syphon) => {
                        let mut drives: Vec<&mut Drive> = construct
                            .drives
                            .iter_mut()
                            .filter(|d| d.working && d.gate == Some(local))
                            .collect();
                        match syphon.tick(&mut drives) {
                            Some(report) => SyphonStep::Done(report.success),
                            None => SyphonStep::Running,
                        }
                    }
                    None => SyphonStep::Done(false),
                }
            };
            if let SyphonStep::Done(success) = step {
                if let Some(gate) = world.gate_mut(source) {
                    gate.syphon = None;
                }
                if let Some(batch) = state.active.take() {
                    if success {
                        self.perform_transit(world, timeline, batch, state.relative, &mut state.summary);
                    } else {
                        state.summary.excluded += 1;
                    }
                }
            }
        }

        if state.active.is_none() && state.deferred.is_empty() {
            let summary = std::mem::take(&mut state.summary);
            return Step::Finish(conclude(summary), true);
        }
        Step::Keep
    }

    /// Move one funded batch: instantly, or as a warp in flight
    fn perform_transit(
        &mut self,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
        batch: EntityBatch,
        relative: Quat,
        summary: &mut TransitSummary,
    ) {
        let root_pos = match batch.root {
            BatchRoot::Construct(key) => world.constructs.get(key).map(|c| c.transform.position),
            BatchRoot::Entity(key) => world.entities.get(key).map(|e| e.transform.position),
        };
        let Some(root_pos) = root_pos else {
            summary.excluded += 1;
            return;
        };

        let travel = timeline.travel_ticks((batch.destination.position - root_pos).magnitude());
        if travel == 0 {
            place_batch(world, &batch, root_pos, relative);
            summary.jumped += 1;
            return;
        }

        let mut warp = WarpInFlight {
            constructs: Vec::new(),
            entities: Vec::new(),
            relative,
            remaining: travel,
            total: travel,
        };
        for key in &batch.constructs {
            if let Some(construct) = world.constructs.get_mut(*key) {
                construct.mid_transit = true;
                let start = construct.transform.position;
                let dest = batch.destination.position + relative * (start - root_pos);
                warp.constructs.push((*key, start, dest));
            }
        }
        for key in &batch.entities {
            if let Some(entity) = world.entities.get_mut(*key) {
                entity.mid_transit = true;
                let start = entity.transform.position;
                let dest = batch.destination.position + relative * (start - root_pos);
                warp.entities.push((*key, start, dest));
            }
        }
        summary.jumped += 1;
        summary.warps += 1;
        self.warps.push(warp);
    }

    fn advance_warps(&mut self, world: &mut WorldModel) {
        self.warps.retain_mut(|warp| {
            warp.remaining = warp.remaining.saturating_sub(1);
            let alpha = 1.0 - warp.remaining as f32 / warp.total as f32;
            let arrived = warp.remaining == 0;
            for (key, start, dest) in &warp.constructs {
                if let Some(construct) = world.constructs.get_mut(*key) {
                    construct.transform.position = *start + (*dest - *start) * alpha;
                    if arrived {
                        construct.transform.rotation = warp.relative * construct.transform.rotation;
                        construct.velocity = warp.relative * construct.velocity;
                        construct.mid_transit = false;
                    }
                }
            }
            for (key, start, dest) in &warp.entities {
                if let Some(entity) = world.entities.get_mut(*key) {
                    entity.transform.position = *start + (*dest - *start) * alpha;
                    if arrived {
                        entity.transform.rotation = warp.relative * entity.transform.rotation;
                        entity.velocity = warp.relative * entity.velocity;
                        entity.mid_transit = false;
                    }
                }
            }
            !arrived
        });
    }

    /// Synthesize the arrival frame of an untethered jump: the waypoint
    /// position bent through gravity fields, plus the random spread
    fn untethered_frame(
        &self,
        world: &WorldModel,
        controller: &ControllerSettings,
        source_env: &WorldEnvelope,
        waypoint: Waypoint,
        rng: &mut StdRng,
    ) -> Result<WorldEnvelope, JumpFailure> {
        let raw = match waypoint {
            Waypoint::Coordinate(p) => p,
            Waypoint::Beacon(id) => {
                let beacon = world
                    .beacons
                    .get(&id)
                    .ok_or(JumpFailure::DestinationVoided)?;
                if beacon.blocked {
                    return Err(JumpFailure::BeaconBlocked);
                }
                beacon.position
            }
            Waypoint::Server(id) => {
                let server = world
                    .servers
                    .get(&id)
                    .ok_or(JumpFailure::CrossServerUnavailable)?;
                if !server.reachable {
                    return Err(JumpFailure::CrossServerUnavailable);
                }
                server.arrival
            }
            Waypoint::Gate(_) | Waypoint::None => return Err(JumpFailure::DestinationUnavailable),
        };

        let mut endpoint = bend_through_gravity(world, source_env.center, raw, &self.settings);
        if self.settings.confine_spread {
            let distance = (endpoint - source_env.center).magnitude();
            endpoint += spread_offset(rng, distance, self.settings.spread_ratio);
        }

        Ok(WorldEnvelope {
            center: endpoint,
            normal: controller
                .normal_override
                .map(|n| n.normalize())
                .unwrap_or(source_env.normal),
            lateral_radius: source_env.lateral_radius,
            depth: source_env.depth,
        })
    }

    /// The single exit path of every admitted transaction
    fn emit_result(
        &mut self,
        world: &mut WorldModel,
        timeline: &mut dyn TimelinePlayer,
        source: GateId,
        target: Option<GateId>,
        outcome: Result<TransitSummary, JumpFailure>,
        reached_transit: bool,
    ) {
        for id in [Some(source), target].into_iter().flatten() {
            if let Some(gate) = world.gate_mut(id) {
                gate.begin_reset();
                gate.finish_reset();
            }
        }

        let cue = match &outcome {
            Ok(_) => TimelineOutcome::Success,
            Err(JumpFailure::Cancelled) => TimelineOutcome::Cancelled,
            Err(_) => TimelineOutcome::Failure,
        };
        timeline.play_outcome(source, cue);
        self.active_jumps = self.active_jumps.saturating_sub(1);

        let message = match &outcome {
            Ok(summary) => format!(
                "jump complete: {}/{} batches jumped",
                summary.jumped, summary.total
            ),
            Err(failure) => format!("jump failed: {failure}"),
        };
        match &outcome {
            Ok(_) => log::info!("gate {}: {message}", source.local),
            Err(_) => log::warn!("gate {}: {message}", source.local),
        }
        self.reports.push(JumpReport {
            source,
            outcome,
            reached_transit,
            message,
        });
    }
}

/// Final outcome of a transit pass: power-starved transits are reported
/// as such, not conflated with an empty jump space
fn conclude(summary: TransitSummary) -> Result<TransitSummary, JumpFailure> {
    if summary.jumped > 0 {
        Ok(summary)
    } else if summary.excluded > 0 {
        Err(JumpFailure::InsufficientPower)
    } else {
        Err(JumpFailure::NoEntitiesJumped)
    }
}

/// Teleport a batch: the root lands on its precomputed destination and
/// every member keeps its offset, rotated into the arrival frame
fn place_batch(world: &mut WorldModel, batch: &EntityBatch, root_pos: Vec3, relative: Quat) {
    for key in &batch.constructs {
        if let Some(construct) = world.constructs.get_mut(*key) {
            construct.transform.position =
                batch.destination.position + relative * (construct.transform.position - root_pos);
            construct.transform.rotation = relative * construct.transform.rotation;
            construct.velocity = relative * construct.velocity;
        }
    }
    for key in &batch.entities {
        if let Some(entity) = world.entities.get_mut(*key) {
            entity.transform.position =
                batch.destination.position + relative * (entity.transform.position - root_pos);
            entity.transform.rotation = relative * entity.transform.rotation;
            entity.velocity = relative * entity.velocity;
        }
    }
}

/// Bend an untethered endpoint through the gravity fields along the
/// path, iterating until the displacement settles
fn bend_through_gravity(
    world: &WorldModel,
    start: Vec3,
    endpoint: Vec3,
    settings: &EngineSettings,
) -> Vec3 {
    let mut bent = endpoint;
    for _ in 0..settings.gravity_bend_iterations {
        let path = bent - start;
        let distance = path.magnitude();
        if distance <= f32::EPSILON {
            break;
        }
        let segments = ((distance / settings.gravity_segment_length).ceil() as usize).clamp(1, 128);
        let step = path / segments as f32;
        let mut pull = Vec3::zeros();
        for i in 0..segments {
            let sample = start + step * (i as f32 + 0.5);
            pull += world.gravity_at(sample);
        }
        let average = pull / segments as f32;
        // One second of simulated free fall per path segment
        bent += average * 0.5 * segments as f32;
    }
    bent
}

/// Random offset inside a sphere of `distance * ratio` meters
fn spread_offset(rng: &mut StdRng, distance: f32, ratio: f32) -> Vec3 {
    if ratio <= f32::EPSILON || distance <= f32::EPSILON {
        return Vec3::zeros();
    }
    let radius = distance * ratio * rng.gen::<f32>();
    loop {
        let candidate = Vec3::new(
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0),
        );
        let magnitude = candidate.magnitude();
        if magnitude > 1e-3 && magnitude <= 1.0 {
            return candidate / magnitude * radius;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::reevaluate_gates;
    use crate::foundation::math::Transform;
    use crate::gate::{ControllerBlock, GatePhase, RemoteAntenna};
    use crate::jump::ScriptedTimeline;
    use crate::world::{Capacitor, Construct, GravitySource, GridSize, WorldEntity};
    use approx::assert_relative_eq;

    fn quick_settings() -> EngineSettings {
        EngineSettings {
            charge_duration_ticks: 3,
            spread_ratio: 0.0,
            ..EngineSettings::default()
        }
    }

    fn rig(world: &mut WorldModel, position: Vec3) -> GateId {
        let mut construct =
            Construct::new("jump rig", GridSize::Large, Transform::from_position(position));
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
        let key = world.spawn_construct(construct);
        let construct = world.constructs.get_mut(key).unwrap();
        let report = reevaluate_gates(key, construct, &EngineSettings::default());
        let local = report.created[0];
        let block = construct.allocate_block_id();
        construct.controllers.insert(
            block,
            ControllerBlock {
                block,
                enabled: true,
                settings: ControllerSettings::default(),
            },
        );
        construct.gates.get_mut(local).unwrap().controller = Some(block);
        GateId { construct: key, local }
    }

    fn configure(world: &mut WorldModel, gate: GateId, f: impl Fn(&mut ControllerSettings)) {
        let construct = world.constructs.get_mut(gate.construct).unwrap();
        for controller in construct.controllers.values_mut() {
            f(&mut controller.settings);
        }
    }

    fn envelope_center(world: &WorldModel, gate: GateId) -> Vec3 {
        world.gate_world_envelope(gate).unwrap().center
    }

    #[test]
    fn tethered_jump_moves_cargo_and_resets_both_gates() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        let target = rig(&mut world, Vec3::new(5000.0, 0.0, 0.0));
        configure(&mut world, source, |s| s.waypoint = Waypoint::Gate(target));

        let cargo = world.spawn_entity(WorldEntity::new(
            "cargo",
            Transform::from_position(envelope_center(&world, source)),
            500.0,
        ));

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        assert_eq!(world.gate(source).unwrap().status, GateStatus::Outbound);
        assert_eq!(world.gate(target).unwrap().status, GateStatus::Inbound);
        assert_eq!(world.gate(target).unwrap().sender_gate, Some(source));

        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }

        let reports = coordinator.drain_reports();
        assert_eq!(reports.len(), 1);
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!(summary.jumped, 1);
        assert_eq!(summary.total, 1);

        let arrival = envelope_center(&world, target);
        let moved = world.entities.get(cargo).unwrap().transform.position;
        assert_relative_eq!((moved - arrival).magnitude(), 0.0, epsilon = 0.1);

        assert!(world.gate(source).unwrap().is_idle());
        assert!(world.gate(target).unwrap().is_idle());
        assert_eq!(world.gate(target).unwrap().sender_gate, None);
        assert_eq!(coordinator.active_jumps(), 0);
        assert_eq!(timeline.outcomes.last().unwrap().1, TimelineOutcome::Success);
    }

    #[test]
    fn unconfigured_gate_is_rejected_at_precheck() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();

        let result = coordinator.request_jump(&mut world, &mut timeline, source);
        assert_eq!(result, Err(JumpFailure::SourceUnconfigured));
        assert!(world.gate(source).unwrap().is_idle());
        let reports = coordinator.drain_reports();
        assert!(!reports[0].reached_transit);
    }

    #[test]
    fn overlapping_outbound_jump_spaces_are_rejected() {
        let mut world = WorldModel::new();
        let a = rig(&mut world, Vec3::zeros());
        let b = rig(&mut world, Vec3::new(5.0, 0.0, 0.0));
        configure(&mut world, a, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0));
        });
        configure(&mut world, b, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 90_000.0));
        });

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator.request_jump(&mut world, &mut timeline, a).unwrap();
        let result = coordinator.request_jump(&mut world, &mut timeline, b);
        assert_eq!(result, Err(JumpFailure::JumpSpaceTransposed));
        assert!(world.gate(b).unwrap().is_idle());
    }

    #[test]
    fn concurrency_cap_rejects_with_subspace_busy() {
        let mut world = WorldModel::new();
        let a = rig(&mut world, Vec3::zeros());
        let b = rig(&mut world, Vec3::new(100_000.0, 0.0, 0.0));
        for gate in [a, b] {
            configure(&mut world, gate, |s| {
                s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 50_000.0, 0.0));
            });
        }

        let settings = EngineSettings {
            max_concurrent_jumps: 1,
            ..quick_settings()
        };
        let mut coordinator = JumpCoordinator::new(settings);
        let mut timeline = ScriptedTimeline::instant();
        coordinator.request_jump(&mut world, &mut timeline, a).unwrap();
        assert_eq!(
            coordinator.request_jump(&mut world, &mut timeline, b),
            Err(JumpFailure::SubspaceBusy)
        );
    }

    #[test]
    fn immediate_cancel_fails_before_transit() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0));
            s.immediate_cancel = true;
        });

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        coordinator.tick(&mut world, &mut timeline);
        coordinator.cancel_jump(&mut world, source);
        coordinator.tick(&mut world, &mut timeline);

        let reports = coordinator.drain_reports();
        assert_eq!(reports[0].outcome, Err(JumpFailure::Cancelled));
        assert!(!reports[0].reached_transit);
        assert!(world.gate(source).unwrap().is_idle());
        assert_eq!(timeline.outcomes.last().unwrap().1, TimelineOutcome::Cancelled);
    }

    #[test]
    fn deferred_cancel_completes_the_charge_first() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0));
            s.immediate_cancel = false;
        });

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        coordinator.tick(&mut world, &mut timeline);
        coordinator.cancel_jump(&mut world, source);

        let mut reports = Vec::new();
        for _ in 0..5 {
            coordinator.tick(&mut world, &mut timeline);
            reports.extend(coordinator.drain_reports());
            if !reports.is_empty() {
                break;
            }
        }
        assert_eq!(reports[0].outcome, Err(JumpFailure::Cancelled));
        // The phase reached Jumping before the cancellation surfaced
        assert!(reports[0].reached_transit);
        assert!(world.gate(source).unwrap().is_idle());
    }

    #[test]
    fn unfunded_batches_are_excluded_when_syphoning_is_disabled() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 100_000.0));
        });

        // 50 MW instantly available on the drives, 30 MW in capacitors
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            for drive in construct.drives.iter_mut() {
                drive.max_charge_mw = 25.0;
                drive.charge_mw = 25.0;
            }
            construct.capacitors.push(Capacitor::new(30.0));
        }

        // Two 1000-tonne pods, 50 MW each at the default power rate
        let center = envelope_center(&world, source);
        for offset in [-2.0f32, 2.0] {
            world.spawn_entity(WorldEntity::new(
                "pod",
                Transform::from_position(center + Vec3::new(offset, 0.0, 0.0)),
                1_000_000.0,
            ));
        }

        let settings = EngineSettings {
            allow_reactor_syphon: false,
            ..quick_settings()
        };
        let mut coordinator = JumpCoordinator::new(settings);
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }

        let reports = coordinator.drain_reports();
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.jumped, 1);
        assert_eq!(summary.excluded, 1);
        assert!(reports[0].message.contains("1/2"));
        // The first pod took the drive power, the second emptied the
        // capacitors before being excluded
        let construct = world.constructs.get(source.construct).unwrap();
        assert_relative_eq!(construct.capacitor_charge_mw(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn deferred_batch_jumps_once_the_syphon_collects() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 100_000.0));
        });

        // Not enough instant power, but the drives recharge fast enough
        // for the smoothed draw to collect the rest
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            for drive in construct.drives.iter_mut() {
                drive.max_charge_mw = 30.0;
                drive.charge_mw = 10.0;
                drive.recharge_mw_per_tick = 0.0;
            }
        }
        let center = envelope_center(&world, source);
        let pod = world.spawn_entity(WorldEntity::new(
            "pod",
            Transform::from_position(center),
            1_000_000.0,
        ));

        let settings = EngineSettings {
            syphon_tick_budget: 10,
            ..quick_settings()
        };
        let mut coordinator = JumpCoordinator::new(settings);
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();

        // After the charge the transaction holds a syphoning batch; top
        // the drives back up so the smoothed draw can finish the 50 MW
        for _ in 0..4 {
            coordinator.tick(&mut world, &mut timeline);
        }
        assert!(world.gate(source).unwrap().syphon.is_some());
        // The gate carries the pending batch mass while the transit runs
        assert_eq!(
            world.gate(source).unwrap().batch_masses,
            vec![1_000_000.0]
        );
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            for drive in construct.drives.iter_mut() {
                drive.charge_mw = 30.0;
            }
        }
        let mut reports = Vec::new();
        for _ in 0..12 {
            coordinator.tick(&mut world, &mut timeline);
            reports.extend(coordinator.drain_reports());
            if !reports.is_empty() {
                break;
            }
        }
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!(summary.jumped, 1);
        let moved = world.entities.get(pod).unwrap().transform.position;
        assert!(moved.z > 90_000.0);
        assert!(world.gate(source).unwrap().syphon.is_none());
        assert!(world.gate(source).unwrap().is_idle());
        assert!(world.gate(source).unwrap().batch_masses.is_empty());
    }

    #[test]
    fn fully_unfunded_transit_fails_with_insufficient_power() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 100_000.0));
        });

        // No stored power anywhere and no reactor syphon to fall back on
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            for drive in construct.drives.iter_mut() {
                drive.charge_mw = 0.0;
                drive.recharge_mw_per_tick = 0.0;
            }
        }
        let center = envelope_center(&world, source);
        world.spawn_entity(WorldEntity::new(
            "pod",
            Transform::from_position(center),
            1_000_000.0,
        ));

        let settings = EngineSettings {
            allow_reactor_syphon: false,
            ..quick_settings()
        };
        let mut coordinator = JumpCoordinator::new(settings);
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }

        let reports = coordinator.drain_reports();
        // A power-starved transit is not an empty jump space
        assert_eq!(reports[0].outcome, Err(JumpFailure::InsufficientPower));
        assert!(reports[0].reached_transit);
        assert!(world.gate(source).unwrap().is_idle());
        assert_eq!(timeline.outcomes.last().unwrap().1, TimelineOutcome::Failure);
    }

    #[test]
    fn antenna_commands_the_gate_when_no_controller_is_attached() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            construct.controllers.clear();
            let block = construct.allocate_block_id();
            construct.antennas.insert(
                block,
                RemoteAntenna {
                    block,
                    enabled: true,
                    world_position: Vec3::zeros(),
                    range_m: 100.0,
                    settings: ControllerSettings {
                        waypoint: Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0)),
                        ..ControllerSettings::default()
                    },
                },
            );
            let gate = construct.gates.get_mut(source.local).unwrap();
            gate.controller = None;
            gate.antenna = Some(block);
        }

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        assert_eq!(world.gate(source).unwrap().status, GateStatus::Outbound);
        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }
        let reports = coordinator.drain_reports();
        assert_eq!(reports[0].outcome, Err(JumpFailure::NoEntities));
        assert!(world.gate(source).unwrap().is_idle());

        // Out of range the same antenna can no longer command the gate
        {
            let construct = world.constructs.get_mut(source.construct).unwrap();
            for antenna in construct.antennas.values_mut() {
                antenna.world_position = Vec3::new(5_000.0, 0.0, 0.0);
            }
        }
        assert_eq!(
            coordinator.request_jump(&mut world, &mut timeline, source),
            Err(JumpFailure::SourceDisconnected)
        );
    }

    #[test]
    fn empty_jump_space_reports_no_entities() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0));
        });

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }

        let reports = coordinator.drain_reports();
        assert_eq!(reports[0].outcome, Err(JumpFailure::NoEntities));
        assert!(reports[0].reached_transit);
        assert!(world.gate(source).unwrap().is_idle());
    }

    #[test]
    fn warped_batches_travel_over_several_ticks() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 6000.0));
        });
        let center = envelope_center(&world, source);
        let pod = world.spawn_entity(WorldEntity::new(
            "pod",
            Transform::from_position(center),
            500.0,
        ));

        let mut coordinator = JumpCoordinator::new(quick_settings());
        // 1000 m/s: the ~6 km trip takes several ticks
        let mut timeline = ScriptedTimeline::warping(1000.0);
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        for _ in 0..3 {
            coordinator.tick(&mut world, &mut timeline);
        }

        let reports = coordinator.drain_reports();
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!(summary.warps, 1);
        assert!(world.entities.get(pod).unwrap().mid_transit);
        assert!(coordinator.warps_in_flight() > 0);

        for _ in 0..400 {
            coordinator.tick(&mut world, &mut timeline);
            if coordinator.warps_in_flight() == 0 {
                break;
            }
        }
        let arrived = world.entities.get(pod).unwrap();
        assert!(!arrived.mid_transit);
        assert_relative_eq!(arrived.transform.position.z, 6000.0, epsilon = 1.0);
    }

    #[test]
    fn gravity_bends_an_untethered_endpoint() {
        let mut world = WorldModel::new();
        world.gravity_sources.push(GravitySource {
            center: Vec3::new(0.0, -3000.0, 5000.0),
            strength: 9.8,
            radius: 20_000.0,
        });
        let settings = EngineSettings::default();
        let bent = bend_through_gravity(
            &world,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 10_000.0),
            &settings,
        );
        assert!(bent.y < -1.0);
        // Without gravity the endpoint is untouched
        let empty = WorldModel::new();
        let straight = bend_through_gravity(
            &empty,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 10_000.0),
            &settings,
        );
        assert_relative_eq!(straight.z, 10_000.0);
        assert_relative_eq!(straight.y, 0.0);
    }

    #[test]
    fn spread_stays_within_the_configured_ratio() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let offset = spread_offset(&mut rng, 10_000.0, 0.002);
            assert!(offset.magnitude() <= 20.0 + 1e-3);
        }
        assert_eq!(spread_offset(&mut rng, 10_000.0, 0.0), Vec3::zeros());
    }

    #[test]
    fn mid_charge_phase_is_charging_until_transit() {
        let mut world = WorldModel::new();
        let source = rig(&mut world, Vec3::zeros());
        configure(&mut world, source, |s| {
            s.waypoint = Waypoint::Coordinate(Vec3::new(0.0, 0.0, 50_000.0));
        });

        let mut coordinator = JumpCoordinator::new(quick_settings());
        let mut timeline = ScriptedTimeline::instant();
        coordinator
            .request_jump(&mut world, &mut timeline, source)
            .unwrap();
        coordinator.tick(&mut world, &mut timeline);
        let gate = world.gate(source).unwrap();
        assert_eq!(gate.status, GateStatus::Outbound);
        assert_eq!(gate.phase, GatePhase::Charging);
        assert!(gate.true_endpoint.is_some());
    }
}
