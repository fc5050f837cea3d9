//! Gate and construct snapshots
//!
//! Snapshots carry the full replicable state of a gate, including a
//! mid-charge Status/Phase pair, so a client joining during a jump
//! reconstructs the gate exactly as the authority sees it. Transient
//! state that is never replicated (running syphons, effect handles)
//! is rebuilt empty on restore.

use serde::{Serialize, Deserialize};

use crate::drive::{Drive, DriveId, DriveRegistry};
use crate::foundation::math::{Transform, Vec3};
use crate::gate::{Gate, GateId, GatePhase, GateRegistry, GateStatus, JumpEnvelope};
use crate::world::{BlockId, Capacitor, Construct, ConstructKey, GridSize};

/// Replicable state of one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// Gate identity
    pub id: GateId,
    /// Current role
    pub status: GateStatus,
    /// Current timeline phase
    pub phase: GatePhase,
    /// Grid-size class of the owning construct
    pub grid_size: GridSize,
    /// Jump node in construct-local space
    pub local_node: Vec3,
    /// Construct-local envelope
    pub envelope: JumpEnvelope,
    /// Drives forming the gate
    pub drives: Vec<DriveId>,
    /// Accepted intersection nodes, construct-local
    pub nodes: Vec<Vec3>,
    /// Corrected destination, present only while outbound
    pub true_endpoint: Option<Vec3>,
    /// Attached controller block
    pub controller: Option<BlockId>,
    /// Commanding antenna block
    pub antenna: Option<BlockId>,
    /// Outbound gate tethered to this one as its destination
    pub sender_gate: Option<GateId>,
    /// Remaining auto-activation countdown
    pub auto_activation_remaining: Option<u32>,
    /// World transform of the owning construct at capture time
    pub construct_transform: Transform,
    /// Pending batch masses in kg; the authority keeps these to itself
    /// and strips them from client-bound snapshots
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub batch_masses: Option<Vec<f32>>,
}

impl GateSnapshot {
    /// Capture a gate's replicable state
    pub fn capture(gate: &Gate, construct_transform: &Transform) -> Self {
        Self {
            id: gate.id,
            status: gate.status,
            phase: gate.phase,
            grid_size: gate.grid_size,
            local_node: gate.local_node,
            envelope: gate.envelope.clone(),
            drives: gate.drives.clone(),
            nodes: gate.nodes.clone(),
            true_endpoint: gate.true_endpoint,
            controller: gate.controller,
            antenna: gate.antenna,
            sender_gate: gate.sender_gate,
            auto_activation_remaining: gate.auto_activation_remaining,
            construct_transform: construct_transform.clone(),
            batch_masses: (!gate.batch_masses.is_empty()).then(|| gate.batch_masses.clone()),
        }
    }

    /// Strip the server-only fields for a client-bound copy
    pub fn for_client(mut self) -> Self {
        self.batch_masses = None;
        self
    }

    /// Rebuild the gate; transient state starts empty
    pub fn restore(&self) -> Gate {
        let mut gate = Gate::new(self.id, self.grid_size);
        gate.status = self.status;
        gate.phase = self.phase;
        gate.local_node = self.local_node;
        gate.envelope = self.envelope.clone();
        gate.drives = self.drives.clone();
        gate.nodes = self.nodes.clone();
        gate.true_endpoint = self.true_endpoint;
        gate.controller = self.controller;
        gate.antenna = self.antenna;
        gate.sender_gate = self.sender_gate;
        gate.auto_activation_remaining = self.auto_activation_remaining;
        gate.batch_masses = self.batch_masses.clone().unwrap_or_default();
        gate
    }
}

/// Replicable state of one construct and its gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructSnapshot {
    /// Construct identity
    pub key: ConstructKey,
    /// Display name
    pub name: String,
    /// Grid-size class
    pub grid_size: GridSize,
    /// World transform
    pub transform: Transform,
    /// Linear velocity (m/s)
    pub velocity: Vec3,
    /// Total mass (kg)
    pub mass_kg: f32,
    /// Drive devices of the construct
    pub drives: Vec<Drive>,
    /// Capacitor blocks
    pub capacitors: Vec<Capacitor>,
    /// Gates of the construct
    pub gates: Vec<GateSnapshot>,
}

impl ConstructSnapshot {
    /// Capture a construct's replicable state
    pub fn capture(key: ConstructKey, construct: &Construct) -> Self {
        Self {
            key,
            name: construct.name.clone(),
            grid_size: construct.grid_size,
            transform: construct.transform.clone(),
            velocity: construct.velocity,
            mass_kg: construct.mass_kg,
            drives: construct.drives.iter().cloned().collect(),
            capacitors: construct.capacitors.clone(),
            gates: construct
                .gates
                .iter()
                .map(|gate| GateSnapshot::capture(gate, &construct.transform))
                .collect(),
        }
    }

    /// Overwrite a construct's replicable state from this snapshot;
    /// local-only state (occupancy, control blocks, attachments) is left
    /// alone
    pub fn apply(&self, construct: &mut Construct) {
        construct.transform = self.transform.clone();
        construct.velocity = self.velocity;
        construct.mass_kg = self.mass_kg;
        construct.capacitors = self.capacitors.clone();
        let mut drives = DriveRegistry::new();
        for drive in &self.drives {
            drives.insert(drive.clone());
        }
        construct.drives = drives;
        let mut gates = GateRegistry::new();
        for gate in &self.gates {
            gates.insert(gate.restore());
        }
        construct.gates = gates;
    }

    /// Rebuild the construct from scratch
    pub fn restore(&self) -> Construct {
        let mut construct = Construct::new(self.name.clone(), self.grid_size, self.transform.clone());
        self.apply(&mut construct);
        construct
    }
}
