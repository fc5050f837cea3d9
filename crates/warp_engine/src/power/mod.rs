//! Power syphon scheduling
//!
//! A jump is funded by draining stored power: first whatever is
//! instantly available on the gate's working drives (split evenly),
//! then the construct's capacitors, and finally - if allowed - a
//! smoothed draw that spreads the shortfall across a fixed tick budget.
//! The smoothed draw re-balances every tick as drives come and go, so a
//! drive dropping offline mid-syphon redistributes its share.

use crate::drive::Drive;
use crate::world::Capacitor;

/// Result of a finished syphon
#[derive(Debug, Clone, PartialEq)]
pub struct SyphonReport {
    /// Whether the full requested amount was collected
    pub success: bool,
    /// Total drained from drives (MW)
    pub drained_from_drives_mw: f32,
    /// Total drained from capacitors (MW)
    pub drained_from_capacitors_mw: f32,
    /// Requested amount still uncollected (MW)
    pub remaining_mw: f32,
}

/// Transient per-gate syphon, created when a jump needs funding and
/// destroyed on completion or gate closure.
#[derive(Debug, Clone)]
pub struct PowerSyphon {
    requested_mw: f32,
    remaining_mw: f32,
    ticks_left: u32,
    drained_from_drives_mw: f32,
    drained_from_capacitors_mw: f32,
    finished: bool,
}

impl PowerSyphon {
    /// Create a syphon for `requested_mw` with a smoothing budget of
    /// `tick_budget` ticks
    pub fn new(requested_mw: f32, tick_budget: u32) -> Self {
        Self {
            requested_mw,
            remaining_mw: requested_mw,
            ticks_left: tick_budget,
            drained_from_drives_mw: 0.0,
            drained_from_capacitors_mw: 0.0,
            finished: false,
        }
    }

    /// Amount still owed (MW)
    pub fn remaining_mw(&self) -> f32 {
        self.remaining_mw
    }

    /// Amount originally requested (MW)
    pub fn requested_mw(&self) -> f32 {
        self.requested_mw
    }

    /// Whether the syphon has already delivered its report
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether everything owed has been collected
    pub fn is_funded(&self) -> bool {
        self.remaining_mw <= 1e-4
    }

    /// Drain instantly-available charge: evenly from working drives,
    /// then from capacitors in order. Returns the amount collected.
    pub fn drain_instant(
        &mut self,
        drives: &mut [&mut Drive],
        capacitors: &mut [Capacitor],
    ) -> f32 {
        let before = self.remaining_mw;

        // Repeated even passes so a drive with little charge hands its
        // unmet share to the others
        loop {
            let available: Vec<usize> = drives
                .iter()
                .enumerate()
                .filter(|(_, d)| d.working && d.charge_mw > 0.0)
                .map(|(i, _)| i)
                .collect();
            if available.is_empty() || self.is_funded() {
                break;
            }
            let share = self.remaining_mw / available.len() as f32;
            let mut progressed = false;
            for index in available {
                let taken = drives[index].drain(share);
                if taken > 0.0 {
                    progressed = true;
                }
                self.remaining_mw -= taken;
                self.drained_from_drives_mw += taken;
            }
            if !progressed {
                break;
            }
        }

        for capacitor in capacitors.iter_mut() {
            if self.is_funded() {
                break;
            }
            let taken = capacitor.drain(self.remaining_mw);
            self.remaining_mw -= taken;
            self.drained_from_capacitors_mw += taken;
        }

        before - self.remaining_mw
    }

    /// Advance the smoothed draw by one tick
    ///
    /// Returns `Some` exactly once, when the tick budget runs out or the
    /// request is fully collected; the syphon must be dropped by the
    /// caller afterwards.
    pub fn tick(&mut self, drives: &mut [&mut Drive]) -> Option<SyphonReport> {
        if self.finished {
            return None;
        }

        if self.ticks_left > 0 && !self.is_funded() {
            let per_tick = self.remaining_mw / self.ticks_left as f32;
            let working: Vec<usize> = drives
                .iter()
                .enumerate()
                .filter(|(_, d)| d.working)
                .map(|(i, _)| i)
                .collect();
            if !working.is_empty() {
                // Re-balanced every tick: the share reflects the live
                // working set and the live remainder
                let share = per_tick / working.len() as f32;
                for index in working {
                    let taken = drives[index].drain(share);
                    self.remaining_mw -= taken;
                    self.drained_from_drives_mw += taken;
                }
            }
            self.ticks_left -= 1;
        }

        if self.ticks_left == 0 || self.is_funded() {
            self.finished = true;
            return Some(SyphonReport {
                success: self.is_funded(),
                drained_from_drives_mw: self.drained_from_drives_mw,
                drained_from_capacitors_mw: self.drained_from_capacitors_mw,
                remaining_mw: self.remaining_mw.max(0.0),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveId;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    fn drive(id: u32, charge: f32) -> Drive {
        let mut d = Drive::new(DriveId(id), Vec3::zeros(), Vec3::z(), Vec3::y(), 50.0);
        d.charge_mw = charge;
        d.max_charge_mw = charge.max(d.max_charge_mw);
        d.recharge_mw_per_tick = 0.0;
        d
    }

    #[test]
    fn instant_drain_conserves_power() {
        let mut a = drive(0, 20.0);
        let mut b = drive(1, 30.0);
        let mut capacitors = vec![Capacitor::new(30.0)];
        let mut syphon = PowerSyphon::new(100.0, 10);

        let mut drives = vec![&mut a, &mut b];
        let collected = syphon.drain_instant(&mut drives, &mut capacitors);

        let report_total = syphon.drained_from_drives_mw
            + syphon.drained_from_capacitors_mw
            + syphon.remaining_mw;
        assert_relative_eq!(report_total, 100.0, epsilon = 1e-3);
        assert_relative_eq!(collected, 80.0, epsilon = 1e-3);
        assert_relative_eq!(syphon.drained_from_drives_mw, 50.0, epsilon = 1e-3);
        assert_relative_eq!(syphon.drained_from_capacitors_mw, 30.0, epsilon = 1e-3);
        assert!(!syphon.is_funded());
    }

    #[test]
    fn uneven_drive_charge_is_redistributed() {
        let mut a = drive(0, 5.0);
        let mut b = drive(1, 100.0);
        let mut syphon = PowerSyphon::new(40.0, 1);
        let mut drives = vec![&mut a, &mut b];
        syphon.drain_instant(&mut drives, &mut []);
        assert!(syphon.is_funded());
        assert_relative_eq!(a.charge_mw, 0.0, epsilon = 1e-3);
        assert_relative_eq!(b.charge_mw, 65.0, epsilon = 1e-3);
    }

    #[test]
    fn smoothed_syphon_sums_to_request_across_budget() {
        let mut a = drive(0, 500.0);
        let mut b = drive(1, 500.0);
        let mut syphon = PowerSyphon::new(60.0, 6);

        let mut report = None;
        for _ in 0..6 {
            let mut drives = vec![&mut a, &mut b];
            if let Some(r) = syphon.tick(&mut drives) {
                report = Some(r);
                break;
            }
        }
        let report = report.expect("syphon must complete within its budget");
        assert!(report.success);
        assert_relative_eq!(report.drained_from_drives_mw, 60.0, epsilon = 1e-3);
        assert_relative_eq!(
            1000.0 - (a.charge_mw + b.charge_mw),
            60.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn offline_drive_share_moves_to_the_rest() {
        let mut a = drive(0, 500.0);
        let mut b = drive(1, 500.0);
        let mut syphon = PowerSyphon::new(60.0, 6);

        for tick in 0..6 {
            if tick == 3 {
                a.working = false;
            }
            let mut drives = vec![&mut a, &mut b];
            if let Some(report) = syphon.tick(&mut drives) {
                assert!(report.success);
                break;
            }
        }
        // b covered a's share once a went offline
        assert!(500.0 - b.charge_mw > 30.0 + 1e-3);
        assert_relative_eq!(
            (500.0 - a.charge_mw) + (500.0 - b.charge_mw),
            60.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn completion_fires_exactly_once() {
        let mut a = drive(0, 0.0);
        a.working = false;
        let mut syphon = PowerSyphon::new(10.0, 2);

        let mut completions = 0;
        for _ in 0..5 {
            let mut drives = vec![&mut a];
            if let Some(report) = syphon.tick(&mut drives) {
                completions += 1;
                assert!(!report.success);
            }
        }
        assert_eq!(completions, 1);
        assert!(syphon.is_finished());
    }
}
