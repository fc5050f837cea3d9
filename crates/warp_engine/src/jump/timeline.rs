//! Timeline player contract
//!
//! The procedural visual/audio timeline is an external collaborator.
//! The engine hands it a charge to animate and an outcome to play; the
//! only thing flowing back is tick advance, which the coordinator
//! drives itself. Tests and the sandbox use the scripted implementation.

use crate::gate::GateId;

/// Outcome cue for the timeline player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineOutcome {
    /// Play the success cue and clean up
    Success,
    /// Play the failure cue and clean up
    Failure,
    /// Play the cancellation cue and clean up
    Cancelled,
}

/// External visual/audio timeline player
pub trait TimelinePlayer {
    /// Begin the charge animation for a gate (and its tethered
    /// destination); the coordinator polls its charge predicate once
    /// per tick for `duration_ticks`
    fn play_charge(&mut self, source: GateId, target: Option<GateId>, duration_ticks: u32);

    /// Play the outcome cue for a finished jump and clean up any
    /// per-gate effects
    fn play_outcome(&mut self, source: GateId, outcome: TimelineOutcome);

    /// Travel time in ticks for a warped batch crossing `distance_m`;
    /// zero means instantaneous teleport
    fn travel_ticks(&self, distance_m: f32) -> u32;
}

/// Deterministic timeline used by tests and the sandbox
#[derive(Debug, Default)]
pub struct ScriptedTimeline {
    /// Charge animations started, in order
    pub charges: Vec<(GateId, Option<GateId>, u32)>,
    /// Outcomes played, in order
    pub outcomes: Vec<(GateId, TimelineOutcome)>,
    /// Warp speed; zero disables warps entirely (instant teleport)
    pub warp_speed_mps: f32,
}

impl ScriptedTimeline {
    /// A timeline whose jumps always teleport instantly
    pub fn instant() -> Self {
        Self::default()
    }

    /// A timeline that warps batches at the given speed
    pub fn warping(warp_speed_mps: f32) -> Self {
        Self {
            warp_speed_mps,
            ..Self::default()
        }
    }
}

impl TimelinePlayer for ScriptedTimeline {
    fn play_charge(&mut self, source: GateId, target: Option<GateId>, duration_ticks: u32) {
        self.charges.push((source, target, duration_ticks));
    }

    fn play_outcome(&mut self, source: GateId, outcome: TimelineOutcome) {
        self.outcomes.push((source, outcome));
    }

    fn travel_ticks(&self, distance_m: f32) -> u32 {
        if self.warp_speed_mps <= f32::EPSILON {
            0
        } else {
            (distance_m / self.warp_speed_mps * crate::foundation::time::TICK_RATE as f32).ceil()
                as u32
        }
    }
}
