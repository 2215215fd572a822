//! Fan monitor (C11) — aggregates each fan's rotor sensors into a
//! functional/present health record, writes it to inventory, and
//! raises `FanError` event logs on sustained faults.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::error::Result;
use crate::tach::TachSensor;

/// Port the monitor writes functional/present state through. A
/// production adapter publishes `OperationalStatus`/`Present`
/// properties on the fan's inventory object; tests use an in-memory
/// double.
pub trait InventoryPort {
    fn set_functional(&mut self, fan: &str, functional: bool) -> Result<()>;
    fn set_present(&mut self, fan: &str, present: bool) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RecordingInventory {
    pub functional: BTreeMap<String, bool>,
    pub present: BTreeMap<String, bool>,
}

impl InventoryPort for RecordingInventory {
    fn set_functional(&mut self, fan: &str, functional: bool) -> Result<()> {
        self.functional.insert(fan.to_string(), functional);
        Ok(())
    }

    fn set_present(&mut self, fan: &str, present: bool) -> Result<()> {
        self.present.insert(fan.to_string(), present);
        Ok(())
    }
}

/// Severity an emitted `FanError` carries; escalates once enough rotors
/// across the chassis are already nonfunctional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Informational,
    Error,
}

#[derive(Debug, Clone)]
pub struct FanError {
    pub fan: String,
    pub rotor: String,
    pub severity: ErrorSeverity,
}

struct PendingErrorTimer {
    rotor: String,
    started: Instant,
}

/// One monitored fan: its rotors, presence, and the derived functional
/// flag (`nonfunctional_rotors >= num_rotors_for_nonfunc`).
pub struct MonitoredFan {
    pub name: String,
    pub rotors: BTreeMap<String, TachSensor>,
    pub num_rotors_for_nonfunc: u64,
    pub error_delay: Duration,
    pub missing_delay: Duration,

    present: bool,
    functional: bool,
    pending_error: Option<PendingErrorTimer>,
    missing_since: Option<Instant>,
    missing_reported: bool,
}

impl MonitoredFan {
    pub fn new(name: impl Into<String>, num_rotors_for_nonfunc: u64) -> Self {
        Self {
            name: name.into(),
            rotors: BTreeMap::new(),
            num_rotors_for_nonfunc,
            error_delay: Duration::from_secs(0),
            missing_delay: Duration::from_secs(0),
            present: true,
            functional: true,
            pending_error: None,
            missing_since: None,
            missing_reported: false,
        }
    }

    pub fn nonfunctional_rotor_count(&self) -> u64 {
        self.rotors.values().filter(|r| !r.is_functional()).count() as u64
    }

    /// Re-derive `functional` from the rotor set. `0` means "never flip
    /// the FRU, only the rotor".
    fn recompute_functional(&mut self) -> bool {
        let was = self.functional;
        self.functional = if self.num_rotors_for_nonfunc == 0 {
            true
        } else {
            self.nonfunctional_rotor_count() < self.num_rotors_for_nonfunc
        };
        was != self.functional
    }

    pub fn set_present(&mut self, present: bool, now: Instant) {
        self.present = present;
        if present {
            self.missing_since = None;
            self.missing_reported = false;
        } else {
            self.missing_since.get_or_insert(now);
        }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    /// Poll time-driven state: the rotor error-delay timer and the
    /// fan-missing-delay timer. Returns any `FanError`s newly raised.
    pub fn poll(&mut self, now: Instant, total_nonfunctional_rotors_in_chassis: u64, escalate_at: u64) -> Vec<FanError> {
        let mut errors = Vec::new();
        let changed = self.recompute_functional();

        if changed && !self.functional && self.pending_error.is_none() {
            if let Some((rotor, _)) = self.rotors.iter().find(|(_, r)| !r.is_functional()) {
                self.pending_error = Some(PendingErrorTimer { rotor: rotor.clone(), started: now });
            }
        }
        if changed && self.functional {
            self.pending_error = None;
        }

        if let Some(pending) = &self.pending_error {
            if now.duration_since(pending.started) >= self.error_delay {
                let severity = if total_nonfunctional_rotors_in_chassis >= escalate_at {
                    ErrorSeverity::Error
                } else {
                    ErrorSeverity::Informational
                };
                errors.push(FanError { fan: self.name.clone(), rotor: pending.rotor.clone(), severity });
                self.pending_error = None;
            }
        }

        if let Some(since) = self.missing_since {
            if !self.missing_reported && now.duration_since(since) >= self.missing_delay {
                self.missing_reported = true;
                warn!("fan {}: missing past delay, reporting", self.name);
            }
        }

        errors
    }
}

/// Drives functional-state writes to inventory for a chassis's worth of
/// fans and aggregates the total nonfunctional-rotor count used for
/// error-severity escalation and the power-off rule engine's
/// `NonfuncFanRotor` cause.
pub struct FanMonitor {
    pub fans: BTreeMap<String, MonitoredFan>,
    pub num_nonfunc_rotors_before_error: u64,
}

impl FanMonitor {
    pub fn new(num_nonfunc_rotors_before_error: u64) -> Self {
        Self { fans: BTreeMap::new(), num_nonfunc_rotors_before_error }
    }

    pub fn total_nonfunctional_rotors(&self) -> u64 {
        self.fans.values().map(MonitoredFan::nonfunctional_rotor_count).sum()
    }

    pub fn missing_fan_count(&self) -> u64 {
        self.fans.values().filter(|f| !f.is_present()).count() as u64
    }

    pub fn poll_all(&mut self, now: Instant, inventory: &mut dyn InventoryPort) -> Vec<FanError> {
        let total = self.total_nonfunctional_rotors();
        let mut errors = Vec::new();
        for fan in self.fans.values_mut() {
            let was_functional = fan.is_functional();
            let fired = fan.poll(now, total, self.num_nonfunc_rotors_before_error);
            if was_functional != fan.is_functional() {
                let _ = inventory.set_functional(&fan.name, fan.is_functional());
                if fan.is_functional() {
                    info!("fan {} restored to functional", fan.name);
                } else {
                    error!("fan {} flipped nonfunctional", fan.name);
                }
            }
            errors.extend(fired);
        }
        errors
    }
}
