//! Tick-based time management
//!
//! The simulation advances in fixed discrete ticks. Everything that is
//! time-dependent (charge durations, syphon budgets, warp travel) is
//! expressed in ticks, never in wall-clock seconds.

/// Discrete simulation tick index
pub type Tick = u64;

/// Fixed simulation rate in ticks per second
pub const TICK_RATE: u32 = 60;

/// Convert a duration in seconds to a whole number of ticks (rounded up)
pub fn ticks_from_secs(seconds: f32) -> u32 {
    (seconds * TICK_RATE as f32).ceil().max(0.0) as u32
}

/// Monotonic tick counter for a running session
#[derive(Debug, Default, Clone)]
pub struct TickClock {
    current: Tick,
}

impl TickClock {
    /// Create a clock starting at tick zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by one tick and return the new tick index
    pub fn advance(&mut self) -> Tick {
        self.current += 1;
        self.current
    }

    /// Current tick index
    pub fn now(&self) -> Tick {
        self.current
    }
}
