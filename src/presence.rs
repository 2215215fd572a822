//! Presence detectors (C15) — tach-based presence with redundant
//! policies and conflict reporting. GPIO detection itself is left out:
//! the GPIO path is modeled only as another [`PresenceDetector`] input,
//! not implemented here.
//!
//! `TachPresence` follows the classic rule: present iff any watched
//! tach sensor reports a non-zero reading.

use log::warn;

/// One presence-detection method for a single fan.
pub trait PresenceDetector {
    fn name(&self) -> &str;
    fn present(&self) -> bool;
}

/// Tach-based presence: present iff any of the fan's rotor tach
/// readings is non-zero.
#[derive(Debug, Default)]
pub struct TachPresence {
    readings: Vec<f64>,
}

impl TachPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, readings: Vec<f64>) {
        self.readings = readings;
    }
}

impl PresenceDetector for TachPresence {
    fn name(&self) -> &str {
        "tach"
    }

    fn present(&self) -> bool {
        self.readings.iter().any(|v| *v != 0.0)
    }
}

/// A fixed presence reading from an external source (e.g. a GPIO line),
/// injected rather than read directly — GPIO reading itself stays
/// outside this component.
#[derive(Debug)]
pub struct FixedPresence {
    name: String,
    value: bool,
}

impl FixedPresence {
    pub fn new(name: impl Into<String>, value: bool) -> Self {
        Self { name: name.into(), value }
    }

    pub fn set(&mut self, value: bool) {
        self.value = value;
    }
}

impl PresenceDetector for FixedPresence {
    fn name(&self) -> &str {
        &self.name
    }

    fn present(&self) -> bool {
        self.value
    }
}

/// Redundant policy over multiple detectors for one fan: "anyOf"
/// reports present if any detector agrees; "fallback" trusts the first
/// detector unless it disagrees with every other, in which case the
/// discrepancy is logged as a conflict and the majority wins.
pub enum RedundancyPolicy {
    AnyOf,
    Fallback,
}

pub struct RedundantPresence {
    pub fan: String,
    pub policy: RedundancyPolicy,
    detectors: Vec<Box<dyn PresenceDetector>>,
}

impl RedundantPresence {
    pub fn new(fan: impl Into<String>, policy: RedundancyPolicy, detectors: Vec<Box<dyn PresenceDetector>>) -> Self {
        Self { fan: fan.into(), policy, detectors }
    }

    pub fn present(&self) -> bool {
        let readings: Vec<bool> = self.detectors.iter().map(|d| d.present()).collect();
        match self.policy {
            RedundancyPolicy::AnyOf => readings.iter().any(|p| *p),
            RedundancyPolicy::Fallback => {
                let Some((&primary, rest)) = readings.split_first() else { return false };
                if rest.iter().any(|r| *r != primary) {
                    self.log_conflict();
                }
                primary || rest.iter().any(|p| *p)
            }
        }
    }

    fn log_conflict(&self) {
        warn!(
            "presence detect conflict for fan {}: detectors disagree ({:?})",
            self.fan,
            self.detectors.iter().map(|d| (d.name(), d.present())).collect::<Vec<_>>()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tach_presence_true_when_any_rotor_spinning() {
        let mut p = TachPresence::new();
        p.update(vec![0.0, 0.0, 4000.0]);
        assert!(p.present());
    }

    #[test]
    fn any_of_policy_is_true_if_one_detector_agrees() {
        let detectors: Vec<Box<dyn PresenceDetector>> = vec![
            Box::new(FixedPresence::new("gpio", false)),
            Box::new(FixedPresence::new("tach", true)),
        ];
        let rp = RedundantPresence::new("fan0", RedundancyPolicy::AnyOf, detectors);
        assert!(rp.present());
    }

    #[test]
    fn fallback_policy_reports_conflict_but_trusts_primary() {
        let detectors: Vec<Box<dyn PresenceDetector>> = vec![
            Box::new(FixedPresence::new("tach", false)),
            Box::new(FixedPresence::new("gpio", true)),
        ];
        let rp = RedundantPresence::new("fan0", RedundancyPolicy::Fallback, detectors);
        assert!(rp.present());
    }
}
