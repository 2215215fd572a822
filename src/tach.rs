//! Tach sensor (C10) — per-rotor fault detection, time-based or
//! count-based, against a deviation band computed from the commanded
//! target.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RING_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMethod {
    TimeBased,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingTimer {
    None,
    Func,
    Nonfunc,
}

/// A single tachometer-monitored rotor.
#[derive(Debug)]
pub struct TachSensor {
    pub name: String,
    pub interface: String,
    pub has_target: bool,
    pub factor: f64,
    pub offset: f64,
    pub method: FaultMethod,
    pub threshold: u64,
    pub timeout: Duration,
    pub functional_delay: Duration,
    pub nonfunc_error_delay: Duration,
    pub count_interval: Duration,
    pub deviation_pct: f64,
    pub ignore_above_max: bool,

    functional: bool,
    has_owner: bool,
    tach_input: f64,
    tach_target: u64,
    counter: u64,

    pending_timer: PendingTimer,
    pending_since: Option<Instant>,
    count_timer_last_tick: Option<Instant>,

    tach_history: VecDeque<f64>,
    target_history: VecDeque<u64>,
}

impl TachSensor {
    pub fn new(name: impl Into<String>, interface: impl Into<String>, method: FaultMethod, threshold: u64) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            has_target: true,
            factor: 1.0,
            offset: 0.0,
            method,
            threshold,
            timeout: Duration::from_secs(30),
            functional_delay: Duration::from_secs(5),
            nonfunc_error_delay: Duration::from_secs(0),
            count_interval: Duration::from_secs(1),
            deviation_pct: 0.25,
            ignore_above_max: false,
            functional: true,
            has_owner: true,
            tach_input: 0.0,
            tach_target: 0,
            counter: 0,
            pending_timer: PendingTimer::None,
            pending_since: None,
            count_timer_last_tick: None,
            tach_history: VecDeque::with_capacity(RING_CAPACITY),
            target_history: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn push_ring(&mut self) {
        if self.tach_history.len() == RING_CAPACITY {
            self.tach_history.pop_front();
            self.target_history.pop_front();
        }
        self.tach_history.push_back(self.tach_input);
        self.target_history.push_back(self.tach_target);
    }

    /// Update the observed tach reading and re-evaluate the fault state.
    pub fn update_tach(&mut self, tach: f64, now: Instant) {
        self.tach_input = tach;
        self.push_ring();
        self.evaluate(now);
    }

    pub fn update_target(&mut self, target: u64, now: Instant) {
        self.tach_target = target;
        self.push_ring();
        self.evaluate(now);
    }

    pub fn set_owner(&mut self, owned: bool, now: Instant) {
        self.has_owner = owned;
        self.evaluate(now);
    }

    /// Whether the current tach reading falls outside the allowed
    /// deviation band around the expected speed.
    pub fn out_of_range(&self) -> bool {
        if !self.has_owner {
            return true;
        }
        let expected = self.tach_target as f64 * self.factor + self.offset;
        let band = self.deviation_pct * expected.abs();
        let lower = (expected - band).max(0.0);
        if self.tach_input < lower {
            return true;
        }
        if !self.ignore_above_max {
            let upper = expected + band;
            if self.tach_input > upper {
                return true;
            }
        }
        false
    }

    fn evaluate(&mut self, now: Instant) {
        match self.method {
            FaultMethod::TimeBased => self.evaluate_time_based(now),
            FaultMethod::Count => self.evaluate_count(),
        }
    }

    fn evaluate_time_based(&mut self, now: Instant) {
        let oor = self.out_of_range();
        match (self.functional, oor, self.pending_timer) {
            (true, true, PendingTimer::Nonfunc) => {
                if now.duration_since(self.pending_since.unwrap_or(now)) >= self.timeout {
                    self.functional = false;
                    self.pending_timer = PendingTimer::None;
                    self.pending_since = None;
                }
            }
            (true, true, _) => {
                self.pending_timer = PendingTimer::Nonfunc;
                self.pending_since = Some(now);
            }
            (true, false, PendingTimer::Nonfunc) => {
                self.pending_timer = PendingTimer::None;
                self.pending_since = None;
            }
            (false, false, PendingTimer::Func) => {
                if now.duration_since(self.pending_since.unwrap_or(now)) >= self.functional_delay {
                    self.functional = true;
                    self.pending_timer = PendingTimer::None;
                    self.pending_since = None;
                }
            }
            (false, false, _) => {
                self.pending_timer = PendingTimer::Func;
                self.pending_since = Some(now);
            }
            (false, true, PendingTimer::Func) => {
                self.pending_timer = PendingTimer::None;
                self.pending_since = None;
            }
            _ => {}
        }
    }

    /// One count-interval tick: increments the fault counter while
    /// out-of-range, decrements while in-range; flips functional at the
    /// bounds and stops the timer (the caller stops rescheduling once
    /// `count_timer_active` returns false).
    pub fn count_tick(&mut self) {
        self.evaluate_count_step();
    }

    fn evaluate_count(&mut self) {
        // Count-based evaluation is driven by `count_tick`, called by the
        // owning monitor's repeating timer; a target/tach update alone
        // only refreshes `out_of_range`'s inputs.
    }

    fn evaluate_count_step(&mut self) {
        if self.out_of_range() {
            self.counter = (self.counter + 1).min(self.threshold);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }
        if self.counter == 0 {
            self.functional = true;
        } else if self.counter >= self.threshold {
            self.functional = false;
        }
    }

    /// Whether the count-interval timer should be running: only while
    /// out-of-range and not yet failed.
    pub fn count_timer_active(&self) -> bool {
        self.method == FaultMethod::Count && self.out_of_range() && self.counter < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_based_flips_nonfunctional_after_timeout() {
        let mut s = TachSensor::new("fan0-r0", "xyz.Tach", FaultMethod::TimeBased, 1);
        s.timeout = Duration::from_millis(20);
        s.deviation_pct = 0.1;
        let start = Instant::now();
        s.update_target(10000, start);
        s.update_tach(0.0, start);
        assert!(s.is_functional());
        s.update_tach(0.0, start + Duration::from_millis(30));
        assert!(!s.is_functional());
    }

    #[test]
    fn reentry_cancels_pending_nonfunc_timer() {
        let mut s = TachSensor::new("fan0-r0", "xyz.Tach", FaultMethod::TimeBased, 1);
        s.timeout = Duration::from_millis(50);
        s.deviation_pct = 0.1;
        let start = Instant::now();
        s.update_target(10000, start);
        s.update_tach(0.0, start);
        s.update_tach(10000.0, start + Duration::from_millis(10));
        s.update_tach(0.0, start + Duration::from_millis(20));
        assert!(s.is_functional());
    }

    #[test]
    fn count_method_flips_at_threshold() {
        let mut s = TachSensor::new("fan0-r0", "xyz.Tach", FaultMethod::Count, 3);
        s.deviation_pct = 0.1;
        s.update_target(10000, Instant::now());
        s.update_tach(0.0, Instant::now());
        for _ in 0..3 {
            s.count_tick();
        }
        assert!(!s.is_functional());
        s.update_tach(10000.0, Instant::now());
        for _ in 0..3 {
            s.count_tick();
        }
        assert!(s.is_functional());
    }

    #[test]
    fn missing_owner_is_always_out_of_range() {
        let mut s = TachSensor::new("fan0-r0", "xyz.Tach", FaultMethod::TimeBased, 1);
        s.set_owner(false, Instant::now());
        assert!(s.out_of_range());
    }
}
