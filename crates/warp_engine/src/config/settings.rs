//! Engine-wide tunables
//!
//! All values are plain data loaded through the [`Config`](super::Config)
//! trait; nothing here is looked up globally at runtime.

use serde::{Serialize, Deserialize};

use crate::config::Config;

/// How the gate's lateral envelope radius is derived from drive distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadiusMode {
    /// Tightest envelope: closest off-plane drive
    Min,
    /// Loosest envelope: farthest off-plane drive
    Max,
    /// Average of off-plane drive distances
    Average,
}

/// What to do when attached sub-objects cannot transit with their root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentPolicy {
    /// Skip the whole batch rather than partially transiting it
    SkipBatch,
    /// Detach and leave the attachments behind
    LeaveBehind,
}

/// Engine-wide settings controlling gate formation and jump execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of gates across all constructs
    pub max_gates_total: usize,

    /// Maximum number of gates per construct grid-size class
    pub max_gates_per_grid_size: usize,

    /// How close both projected raycast points must be to their midpoint
    /// for a drive pair to count as intersecting (meters)
    pub raycast_width_tolerance: f32,

    /// How the lateral envelope radius is derived
    pub radius_mode: RadiusMode,

    /// Charge phase duration in ticks
    pub charge_duration_ticks: u32,

    /// Tick budget for a smoothed power syphon
    pub syphon_tick_budget: u32,

    /// Upper bound on concurrently active jump transactions
    pub max_concurrent_jumps: u32,

    /// Whether a funding shortfall may be syphoned from capacitors and
    /// reactors over time; when false, unfunded batches are excluded
    pub allow_reactor_syphon: bool,

    /// Whether the random arrival spread is shared by all batches of an
    /// untethered jump (true) or drawn per batch (false)
    pub confine_spread: bool,

    /// Segment length used when bending untethered paths through gravity
    /// fields (meters)
    pub gravity_segment_length: f32,

    /// Iterations of gravity bending applied to an untethered endpoint
    pub gravity_bend_iterations: u32,

    /// Arrival spread radius as a fraction of jump distance
    pub spread_ratio: f32,

    /// Power cost per tonne of batch mass (MW)
    pub power_per_tonne_mw: f32,

    /// Force applied to each working drive per charge tick (N), positive
    /// pulls toward the jump node
    pub charge_force_newtons: f32,

    /// Policy when attachments cannot accompany their batch root
    pub attachment_policy: AttachmentPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_gates_total: 16,
            max_gates_per_grid_size: 8,
            raycast_width_tolerance: 1.25,
            radius_mode: RadiusMode::Average,
            charge_duration_ticks: 600,
            syphon_tick_budget: 300,
            max_concurrent_jumps: 4,
            allow_reactor_syphon: true,
            confine_spread: true,
            gravity_segment_length: 1000.0,
            gravity_bend_iterations: 8,
            spread_ratio: 0.002,
            power_per_tonne_mw: 0.05,
            charge_force_newtons: 1500.0,
            attachment_policy: AttachmentPolicy::SkipBatch,
        }
    }
}

impl Config for EngineSettings {}
