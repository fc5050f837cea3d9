//! Gate sandbox
//!
//! A headless demonstration of the jump protocol: two gate rigs are
//! built drive by drive, tethered together, and a handful of cargo pods
//! is jumped from one to the other while the session log narrates each
//! phase.

use rand::Rng;
use warp_engine::prelude::*;

struct SandboxApp {
    session: Session,
    outbound: GateId,
    inbound: GateId,
}

impl SandboxApp {
    fn new() -> Self {
        log::info!("creating gate sandbox session...");
        let settings = EngineSettings {
            charge_duration_ticks: 120,
            ..EngineSettings::default()
        };
        let timeline = Box::new(ScriptedTimeline::warping(2_000.0));
        let mut session = Session::new(settings, timeline);

        log::info!("building the outbound rig...");
        let outbound_key = spawn_rig(&mut session, "freight dock", Vec3::zeros());
        log::info!("building the inbound rig...");
        let inbound_key = spawn_rig(
            &mut session,
            "orbital yard",
            Vec3::new(0.0, 0.0, 80_000.0),
        );

        // One tick lets the cluster pass form the gates
        session.tick();
        let outbound = first_gate(&session, outbound_key);
        let inbound = first_gate(&session, inbound_key);
        log::info!(
            "gates formed: {} -> {}",
            outbound.local,
            inbound.local
        );

        tether(&mut session, outbound, Waypoint::Gate(inbound));
        tether(&mut session, inbound, Waypoint::None);

        Self {
            session,
            outbound,
            inbound,
        }
    }

    fn load_cargo(&mut self) {
        let Some(envelope) = self.session.world.gate_world_envelope(self.outbound) else {
            log::error!("outbound gate has no envelope");
            return;
        };
        let mut rng = rand::thread_rng();
        for i in 0..3 {
            let offset = envelope.center
                + Vec3::new(rng.gen_range(-3.0..3.0), 0.0, rng.gen_range(-0.5..0.5));
            let key = self.session.world.spawn_entity(WorldEntity::new(
                format!("cargo pod {i}"),
                Transform::from_position(offset),
                80_000.0,
            ));
            log::info!("loaded cargo pod {i} ({key:?}) into the jump space");
        }
    }

    fn run(&mut self) {
        self.load_cargo();

        log::info!("requesting the jump...");
        if let Err(failure) = self.session.request_jump(self.outbound) {
            log::error!("jump rejected: {failure}");
            return;
        }

        // Charge, transit, and warp travel all play out on the tick loop
        let mut resolved = false;
        for _ in 0..3_000 {
            self.session.tick();
            for message in self.session.drain_outbox() {
                if let MessageKind::JumpEvent { gate, event } = &message.kind {
                    log::info!("[tick {}] gate {}: {event:?}", self.session.now(), gate.local);
                    if matches!(event, JumpEvent::Succeeded { .. } | JumpEvent::Failed { .. }) {
                        resolved = true;
                    }
                }
            }
            if resolved && self.session.coordinator.warps_in_flight() == 0 {
                break;
            }
        }

        let arrival = self
            .session
            .world
            .gate_world_envelope(self.inbound)
            .map(|e| e.center)
            .unwrap_or_else(Vec3::zeros);
        for (_, entity) in self.session.world.entities.iter() {
            let distance = (entity.transform.position - arrival).magnitude();
            log::info!(
                "{}: {:.1} m from the arrival node",
                entity.name,
                distance
            );
        }
    }
}

fn spawn_rig(session: &mut Session, name: &str, position: Vec3) -> ConstructKey {
    let mut construct = Construct::new(name, GridSize::Large, Transform::from_position(position));
    // A slab of hull below the drives
    for x in -4..=4 {
        for z in -4..=4 {
            construct.add_block((x, -2, z), 2_000.0);
        }
    }
    // Two drives converging 10 m above the deck
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
    construct.capacitors.push(Capacitor::new(500.0));
    session.world.spawn_construct(construct)
}

fn first_gate(session: &Session, key: ConstructKey) -> GateId {
    let construct = &session.world.constructs[key];
    let local = construct.gates.ids()[0];
    GateId {
        construct: key,
        local,
    }
}

fn tether(session: &mut Session, gate: GateId, waypoint: Waypoint) {
    let Some(construct) = session.world.constructs.get_mut(gate.construct) else {
        log::error!("construct of gate {} is missing", gate.local);
        return;
    };
    let block = construct.allocate_block_id();
    construct.controllers.insert(
        block,
        ControllerBlock {
            block,
            enabled: true,
            settings: ControllerSettings {
                waypoint,
                ..ControllerSettings::default()
            },
        },
    );
    if let Some(gate) = construct.gates.get_mut(gate.local) {
        gate.controller = Some(block);
    }
}

fn main() {
    warp_engine::foundation::logging::init();
    log::info!("gate sandbox starting");
    let mut app = SandboxApp::new();
    app.run();
    log::info!("gate sandbox finished");
}
