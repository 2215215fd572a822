//! Trust groups (C12) — a sensor is trusted iff every trust group it
//! belongs to votes trust; a non-zero-speed group votes trust iff at
//! least one member reports non-zero tach.

use std::collections::BTreeMap;

/// A non-zero-speed trust group: votes trust iff any member has a
/// non-zero tach reading.
#[derive(Debug, Default)]
pub struct NonZeroSpeedTrustGroup {
    pub members: Vec<String>,
    tach_readings: BTreeMap<String, f64>,
}

impl NonZeroSpeedTrustGroup {
    pub fn new(members: Vec<String>) -> Self {
        Self { members, tach_readings: BTreeMap::new() }
    }

    pub fn update_tach(&mut self, sensor: &str, value: f64) {
        self.tach_readings.insert(sensor.to_string(), value);
    }

    pub fn votes_trust(&self) -> bool {
        self.members
            .iter()
            .any(|m| self.tach_readings.get(m).is_some_and(|v| *v != 0.0))
    }
}

/// Tracks, per rotor sensor, whether all of its trust groups currently
/// vote trust. On a trust-loss-to-trust-restored transition, callers
/// should re-arm that sensor's fault timers from scratch.
#[derive(Debug, Default)]
pub struct TrustManager {
    groups: Vec<NonZeroSpeedTrustGroup>,
    sensor_group_indices: BTreeMap<String, Vec<usize>>,
    last_trusted: BTreeMap<String, bool>,
}

impl TrustManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, sensors: Vec<String>, group: NonZeroSpeedTrustGroup) {
        let idx = self.groups.len();
        self.groups.push(group);
        for sensor in sensors {
            self.sensor_group_indices.entry(sensor).or_default().push(idx);
        }
    }

    pub fn update_tach(&mut self, sensor: &str, value: f64) {
        if let Some(indices) = self.sensor_group_indices.get(sensor) {
            for &idx in indices {
                self.groups[idx].update_tach(sensor, value);
            }
        }
    }

    pub fn is_trusted(&self, sensor: &str) -> bool {
        match self.sensor_group_indices.get(sensor) {
            None => true,
            Some(indices) => indices.iter().all(|&i| self.groups[i].votes_trust()),
        }
    }

    /// Returns `true` exactly when `sensor` just transitioned from
    /// untrusted to trusted, meaning its fault timers must restart.
    pub fn check_restored(&mut self, sensor: &str) -> bool {
        let now_trusted = self.is_trusted(sensor);
        let was_trusted = self.last_trusted.insert(sensor.to_string(), now_trusted).unwrap_or(true);
        now_trusted && !was_trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_when_all_members_report_zero() {
        let mut tm = TrustManager::new();
        tm.add_group(
            vec!["fan0-r0".into(), "fan1-r0".into()],
            NonZeroSpeedTrustGroup::new(vec!["fan0-r0".into(), "fan1-r0".into()]),
        );
        tm.update_tach("fan0-r0", 0.0);
        tm.update_tach("fan1-r0", 0.0);
        assert!(!tm.is_trusted("fan0-r0"));
    }

    #[test]
    fn trusted_when_any_member_nonzero() {
        let mut tm = TrustManager::new();
        tm.add_group(
            vec!["fan0-r0".into(), "fan1-r0".into()],
            NonZeroSpeedTrustGroup::new(vec!["fan0-r0".into(), "fan1-r0".into()]),
        );
        tm.update_tach("fan0-r0", 0.0);
        tm.update_tach("fan1-r0", 4000.0);
        assert!(tm.is_trusted("fan0-r0"));
    }

    #[test]
    fn restoration_is_reported_once() {
        let mut tm = TrustManager::new();
        tm.add_group(vec!["fan0-r0".into()], NonZeroSpeedTrustGroup::new(vec!["fan0-r0".into()]));
        tm.update_tach("fan0-r0", 0.0);
        assert!(!tm.check_restored("fan0-r0"));
        tm.update_tach("fan0-r0", 4000.0);
        assert!(tm.check_restored("fan0-r0"));
        assert!(!tm.check_restored("fan0-r0"));
    }
}
