//! End-to-end tethered jump through a full session
//!
//! Builds two gate rigs out of raw blocks and drives, tethers them,
//! loads cargo into the source jump space, and runs the whole protocol
//! through `Session::tick` the way an embedding game loop would.

use warp_engine::prelude::*;

fn spawn_rig(session: &mut Session, name: &str, position: Vec3) -> ConstructKey {
    let mut construct = Construct::new(name, GridSize::Large, Transform::from_position(position));
    for x in -4..=4 {
        for z in -4..=4 {
            construct.add_block((x, -2, z), 2_000.0);
        }
    }
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
    let local = session.world.constructs[key].gates.ids()[0];
    GateId {
        construct: key,
        local,
    }
}

fn attach_controller(session: &mut Session, gate: GateId, waypoint: Waypoint) {
    let construct = session.world.constructs.get_mut(gate.construct).unwrap();
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
    construct.gates.get_mut(gate.local).unwrap().controller = Some(block);
}

#[test]
fn tethered_cargo_jump_runs_end_to_end() {
    let settings = EngineSettings {
        charge_duration_ticks: 5,
        spread_ratio: 0.0,
        ..EngineSettings::default()
    };
    let mut session = Session::new(settings, Box::new(ScriptedTimeline::instant()));

    let source_key = spawn_rig(&mut session, "freight dock", Vec3::zeros());
    let target_key = spawn_rig(
        &mut session,
        "orbital yard",
        Vec3::new(0.0, 0.0, 50_000.0),
    );
    session.tick();

    let source = first_gate(&session, source_key);
    let target = first_gate(&session, target_key);
    attach_controller(&mut session, source, Waypoint::Gate(target));
    attach_controller(&mut session, target, Waypoint::None);

    let source_center = session.world.gate_world_envelope(source).unwrap().center;
    let pod = session.world.spawn_entity(WorldEntity::new(
        "cargo pod",
        Transform::from_position(source_center),
        80_000.0,
    ));

    session.drain_outbox();
    session.request_jump(source).unwrap();
    assert_eq!(
        session.world.gate(source).unwrap().status,
        GateStatus::Outbound
    );
    assert_eq!(
        session.world.gate(target).unwrap().status,
        GateStatus::Inbound
    );

    for _ in 0..8 {
        session.tick();
    }

    // The pod arrived inside the destination jump space
    let arrival = session.world.gate_world_envelope(target).unwrap();
    let position = session.world.entities[pod].transform.position;
    assert!(
        arrival.contains_point(position),
        "pod ended up at {position:?}, outside the arrival envelope"
    );

    // Both gates wound back to rest and the outcome went out on the wire
    assert!(session.world.gate(source).unwrap().is_idle());
    assert!(session.world.gate(target).unwrap().is_idle());
    assert!(session.world.gate(target).unwrap().sender_gate.is_none());

    let messages = session.drain_outbox();
    let succeeded = messages.iter().find_map(|m| match &m.kind {
        MessageKind::JumpEvent {
            gate,
            event: JumpEvent::Succeeded { jumped, total, .. },
        } if *gate == source => Some((*jumped, *total)),
        _ => None,
    });
    assert_eq!(succeeded, Some((1, 1)));

    // The session emitted the corrected endpoint while the gate was live
    assert!(messages
        .iter()
        .any(|m| matches!(m.kind, MessageKind::TrueEndpoint { gate, .. } if gate == source)));
}
