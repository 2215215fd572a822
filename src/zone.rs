//! Zone (C7) — arbitrates target requests from every bound action and
//! fans the resolved target out to its fans.
//!
//! The increase/decrease state machine is driven by two monotonic
//! timers. The zone owns the decision logic only; a caller (the
//! manager's event loop) owns the actual `tokio::time::Instant`
//! bookkeeping, calling [`Zone::increase_timer_expired`] /
//! [`Zone::decrease_timer_expired`] when each timer fires.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::fan::Fan;

/// Unique identity of a hold contributed by one action instance, used
/// as the key into the floor/target hold tables.
pub type HoldIdent = String;

#[derive(Debug)]
pub struct Zone {
    pub name: String,
    pub ceiling: u64,
    pub default_floor: u64,
    pub poweron_target: u64,

    target: u64,
    floor: u64,
    active: bool,

    target_holds: BTreeMap<HoldIdent, u64>,
    floor_holds: BTreeMap<HoldIdent, u64>,

    inc_delta: u64,
    dec_delta: u64,
    request_base: u64,
    increase_timer_running: bool,
    decrease_allowed: BTreeMap<String, bool>,
    floor_change_allowed: BTreeMap<String, bool>,

    pub fans: Vec<String>,
}

impl Zone {
    pub fn new(name: impl Into<String>, ceiling: u64, default_floor: u64, poweron_target: u64) -> Self {
        Self {
            name: name.into(),
            ceiling,
            default_floor,
            poweron_target,
            target: default_floor,
            floor: default_floor,
            active: true,
            target_holds: BTreeMap::new(),
            floor_holds: BTreeMap::new(),
            inc_delta: 0,
            dec_delta: 0,
            request_base: default_floor,
            increase_timer_running: false,
            decrease_allowed: BTreeMap::new(),
            floor_change_allowed: BTreeMap::new(),
            fans: Vec::new(),
        }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_decrease_allowed(&mut self, key: impl Into<String>, allowed: bool) {
        self.decrease_allowed.insert(key.into(), allowed);
    }

    pub fn set_floor_change_allowed(&mut self, key: impl Into<String>, allowed: bool) {
        self.floor_change_allowed.insert(key.into(), allowed);
    }

    /// Push the current target to every fan named in `self.fans`,
    /// skipping names with no live `Fan` instance (e.g. not yet
    /// discovered on the bus).
    fn push_target_to_fans(&self, fans: &mut BTreeMap<String, Fan>) {
        for name in &self.fans {
            if let Some(fan) = fans.get_mut(name) {
                fan.set_target(self.target);
            }
        }
    }

    /// Assign the target directly, fanning out to every fan. A no-op
    /// while the zone is inactive (a target hold is in force).
    pub fn set_target(&mut self, v: u64, fans: &mut BTreeMap<String, Fan>) {
        if !self.active {
            return;
        }
        let v = v.clamp(self.floor, self.ceiling);
        if v != self.target {
            debug!("zone {}: target {} -> {}", self.name, self.target, v);
            self.target = v;
        }
        self.push_target_to_fans(fans);
    }

    /// Accumulate an increase request. Restarts the one-shot increase
    /// timer on acceptance.
    pub fn request_increase(&mut self, delta: u64, fans: &mut BTreeMap<String, Fan>) {
        if delta > self.inc_delta && self.target < self.ceiling {
            let new = self
                .ceiling
                .min(self.request_base + (delta - self.inc_delta));
            self.request_base = new;
            self.inc_delta = delta;
            self.increase_timer_running = true;
            self.set_target(new, fans);
        }
    }

    /// Expiration of the one-shot increase timer: resets `inc_delta` so
    /// further increase requests can accumulate again.
    pub fn increase_timer_expired(&mut self) {
        self.inc_delta = 0;
        self.increase_timer_running = false;
    }

    /// Accumulate a decrease request: the **minimum** non-zero request
    /// observed per decrease interval wins.
    pub fn request_decrease(&mut self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.dec_delta = if self.dec_delta == 0 {
            delta
        } else {
            self.dec_delta.min(delta)
        };
    }

    /// Repeating decrease-timer tick: steps the target down by
    /// `dec_delta` when every allow-gate is open and no increase is
    /// currently pending. `dec_delta` is always reset afterward.
    pub fn decrease_timer_expired(&mut self, fans: &mut BTreeMap<String, Fan>) {
        let all_allowed = self.decrease_allowed.values().all(|v| *v);
        if all_allowed && self.dec_delta > 0 && self.inc_delta == 0 && !self.increase_timer_running {
            let stepped = self.target.saturating_sub(self.dec_delta).max(self.floor);
            self.request_base = stepped;
            self.set_target(stepped, fans);
        }
        self.dec_delta = 0;
    }

    /// Insert or erase a target hold. The zone goes inactive while any
    /// hold is present and its target is pinned to the table's maximum;
    /// it reactivates once the table empties.
    pub fn set_target_hold(&mut self, ident: impl Into<String>, value: u64, hold: bool, fans: &mut BTreeMap<String, Fan>) {
        let ident = ident.into();
        if hold {
            self.target_holds.insert(ident, value);
        } else {
            self.target_holds.remove(&ident);
        }

        if let Some(&max) = self.target_holds.values().max() {
            self.active = false;
            self.target = max.clamp(self.floor, self.ceiling);
            info!("zone {}: held at target {}", self.name, self.target);
        } else if !self.active {
            self.active = true;
            info!("zone {}: target holds released, resuming arbitration", self.name);
        }
        self.push_target_to_fans(fans);
    }

    /// Insert or erase a floor hold. Deferred entirely if any
    /// `floor_change_allowed` gate is closed.
    pub fn set_floor_hold(&mut self, ident: impl Into<String>, value: u64, hold: bool, fans: &mut BTreeMap<String, Fan>) {
        if self.floor_change_allowed.values().any(|v| !*v) {
            return;
        }

        let ident = ident.into();
        let clamped = value.min(self.ceiling);
        if hold {
            self.floor_holds.insert(ident, clamped);
        } else {
            self.floor_holds.remove(&ident);
        }

        let new_floor = self.floor_holds.values().max().copied().unwrap_or(self.default_floor);
        let old_floor = self.floor;
        self.floor = new_floor;

        if self.target < new_floor {
            self.request_increase(new_floor - old_floor.min(new_floor), fans);
            self.set_target(new_floor, fans);
        }
    }

    /// Lock `fan` at `value`, delegating to [`Fan::lock_target`].
    pub fn lock_fan_target(&self, fan: &str, value: u64, fans: &mut BTreeMap<String, Fan>) {
        if let Some(f) = fans.get_mut(fan) {
            f.lock_target(value);
        }
    }

    /// Unlock `fan` at `value`, delegating to [`Fan::unlock_target`] with
    /// this zone's current target as the fallback.
    pub fn unlock_fan_target(&self, fan: &str, value: u64, fans: &mut BTreeMap<String, Fan>) {
        if let Some(f) = fans.get_mut(fan) {
            f.unlock_target(value, self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increase_then_expire_allows_reaccumulation() {
        let mut z = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        z.request_increase(20, &mut fans);
        assert_eq!(z.target(), 30);
        z.increase_timer_expired();
        z.request_increase(20, &mut fans);
        assert_eq!(z.target(), 50);
    }

    #[test]
    fn increase_is_noop_when_not_exceeding_current_delta() {
        let mut z = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        z.request_increase(20, &mut fans);
        let t = z.target();
        z.request_increase(10, &mut fans);
        assert_eq!(z.target(), t);
    }

    #[test]
    fn decrease_takes_minimum_nonzero_request() {
        let mut z = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        z.set_decrease_allowed("a", true);
        z.request_decrease(30);
        z.request_decrease(5);
        z.decrease_timer_expired(&mut fans);
        assert_eq!(z.target(), 45);
    }

    #[test]
    fn decrease_blocked_while_increase_pending() {
        let mut z = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        z.set_decrease_allowed("a", true);
        z.request_increase(5, &mut fans);
        z.request_decrease(5);
        z.decrease_timer_expired(&mut fans);
        assert_eq!(z.target(), 55);
    }

    #[test]
    fn target_hold_pins_and_releases() {
        let mut z = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        z.set_target_hold("h1", 80, true, &mut fans);
        assert!(!z.is_active());
        assert_eq!(z.target(), 80);
        z.set_target_hold("h1", 80, false, &mut fans);
        assert!(z.is_active());
    }

    #[test]
    fn floor_hold_raises_target_when_above_it() {
        let mut z = Zone::new("z1", 100, 10, 20);
        let mut fans = BTreeMap::new();
        z.set_floor_hold("f1", 50, true, &mut fans);
        assert_eq!(z.floor(), 50);
        assert!(z.target() >= 50);
    }

    #[test]
    fn floor_change_deferred_when_gate_closed() {
        let mut z = Zone::new("z1", 100, 10, 20);
        let mut fans = BTreeMap::new();
        z.set_floor_change_allowed("gate", false);
        z.set_floor_hold("f1", 50, true, &mut fans);
        assert_eq!(z.floor(), 10);
    }

    #[test]
    fn set_target_pushes_to_named_fans() {
        let mut z = Zone::new("z1", 100, 10, 50);
        z.fans.push("fan0".into());
        let mut fans = BTreeMap::new();
        fans.insert("fan0".to_string(), Fan::new("fan0", "xyz.Target"));
        z.set_target(80, &mut fans);
        assert_eq!(fans.get("fan0").unwrap().current_target(), 80);
    }

    #[test]
    fn lock_and_unlock_fan_target_delegate_to_fan() {
        let mut z = Zone::new("z1", 100, 10, 50);
        z.fans.push("fan0".into());
        let mut fans = BTreeMap::new();
        fans.insert("fan0".to_string(), Fan::new("fan0", "xyz.Target"));
        z.lock_fan_target("fan0", 90, &mut fans);
        assert!(fans.get("fan0").unwrap().is_locked());
        assert_eq!(fans.get("fan0").unwrap().current_target(), 90);
        z.unlock_fan_target("fan0", 90, &mut fans);
        assert!(!fans.get("fan0").unwrap().is_locked());
    }
}
