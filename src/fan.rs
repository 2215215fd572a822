//! Fan, control side (C8) — fans a zone's arbitrated target out to each
//! of the fan's sensor target properties, honoring a stack of locked
//! targets via `lock_target`/`unlock_target`.

use std::collections::BTreeMap;

use log::debug;

#[derive(Debug)]
pub struct Fan {
    pub name: String,
    pub interface: String,
    /// Sensor path -> serving service, in fan-out order.
    pub sensors: BTreeMap<String, String>,
    current_target: u64,
    /// Sorted (ascending) stack of locked target values; the highest
    /// entry, if any, wins over whatever the zone requests.
    lock_stack: Vec<u64>,
}

impl Fan {
    pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            sensors: BTreeMap::new(),
            current_target: 0,
            lock_stack: Vec::new(),
        }
    }

    pub fn add_sensor(&mut self, path: impl Into<String>, service: impl Into<String>) {
        self.sensors.insert(path.into(), service.into());
    }

    pub fn current_target(&self) -> u64 {
        self.current_target
    }

    /// Assign `v` to every sensor's target property, unless a lock with
    /// a value `>= v` is already in force.
    pub fn set_target(&mut self, v: u64) {
        if self.lock_stack.last().is_some_and(|&locked| locked >= v) {
            return;
        }
        if v != self.current_target {
            debug!("fan {}: target {} -> {}", self.name, self.current_target, v);
        }
        self.current_target = v;
    }

    /// Push `v` onto the lock stack and write it immediately, regardless
    /// of any weaker existing lock.
    pub fn lock_target(&mut self, v: u64) {
        let pos = self.lock_stack.partition_point(|&x| x <= v);
        self.lock_stack.insert(pos, v);
        self.current_target = v;
    }

    /// Pop one occurrence of `v` from the lock stack. The fan then
    /// re-adopts the next-highest remaining lock, or `zone_target` if
    /// the stack is now empty.
    pub fn unlock_target(&mut self, v: u64, zone_target: u64) {
        if let Some(pos) = self.lock_stack.iter().rposition(|&x| x == v) {
            self.lock_stack.remove(pos);
        }
        let next = self.lock_stack.last().copied().unwrap_or(zone_target);
        self.current_target = next;
    }

    pub fn is_locked(&self) -> bool {
        !self.lock_stack.is_empty()
    }
}
