//! Serde schemas for the seven recognized configuration file roles:
//! profiles, fans, zones, groups, events, monitor config, and PCIe
//! card metadata.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// `profiles.json` — named profiles, each with an activity predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    /// `all_of` over property equalities; an empty list is always active.
    #[serde(default)]
    pub all_of: Vec<PropertyEquality>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyEquality {
    pub path: String,
    pub interface: String,
    pub property: String,
    pub value: PropertyValue,
}

/// `fans.json` — control-side fan declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    pub name: String,
    pub interface: String,
    pub zone: String,
    pub sensors: Vec<String>,
}

/// `zones.json` — zone declarations, including the published
/// `ThermalMode` interface contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub poweron_target: u64,
    pub default_floor: u64,
    pub default_ceiling: u64,
    #[serde(with = "duration_secs")]
    pub increase_delay: Duration,
    #[serde(with = "duration_secs")]
    pub decrease_interval: Duration,
    #[serde(default)]
    pub thermal_mode_supported: Vec<String>,
    #[serde(default)]
    pub thermal_mode_current: Option<String>,
}

/// `groups.json` — named groups of object paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub interface: String,
    pub property: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub expected_value: Option<PropertyValue>,
}

/// `events.json` — one configured event: groups, triggers, actions,
/// gated by an optional profile list and precondition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub name: String,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub precondition: Option<PropertyEquality>,
    pub groups: Vec<String>,
    /// Raw per-trigger JSON; parsed into [`crate::trigger::Trigger`] by
    /// the manager once action names are resolved against the registry.
    pub triggers: Vec<serde_json::Value>,
    pub actions: Vec<serde_json::Value>,
}

/// `config.json` (monitor) — top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub fans: Vec<MonitorFanConfig>,
    pub deviation: f64,
    pub num_sensor_fails_for_nonfunc: u64,
    #[serde(with = "duration_secs")]
    pub monitor_start_delay: Duration,
    #[serde(with = "duration_secs")]
    pub count_interval: Duration,
    #[serde(with = "duration_secs")]
    pub fan_missing_err_delay: Duration,
    #[serde(default)]
    pub sensor_trust_groups: Vec<TrustGroupConfig>,
    #[serde(default)]
    pub fault_handling: FaultHandlingConfig,
    pub num_nonfunc_rotors_before_error: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustGroupConfig {
    pub name: String,
    pub sensors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultHandlingConfig {
    #[serde(default)]
    pub power_off_config: Vec<PowerOffConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerOffConfig {
    pub name: String,
    pub validity: String,
    pub cause: CauseConfig,
    pub action: ActionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CauseConfig {
    MissingFanFru { threshold: u64 },
    NonfuncFanRotor { threshold: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Hard { delay_secs: u64 },
    Soft { delay_secs: u64 },
    Epow { service_delay_secs: u64, meltdown_delay_secs: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorFanConfig {
    pub name: String,
    pub sensors: Vec<MonitorSensorConfig>,
    #[serde(default)]
    pub num_rotors_for_nonfunc: u64,
    #[serde(default, with = "duration_secs_opt")]
    pub nonfunc_rotor_err_delay: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSensorConfig {
    pub name: String,
    pub has_target: bool,
    pub factor: f64,
    pub offset: f64,
    pub threshold: u64,
    pub method: String,
    #[serde(default)]
    pub ignore_above_max: bool,
    #[serde(default, with = "duration_secs_opt")]
    pub nonfunc_rotor_err_delay: Option<Duration>,
}

/// `pcie_cards.json` — per-card floor-index metadata. Exactly one of
/// `floor_index`/`has_temp_sensor` is expected to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcieCardEntry {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
    #[serde(default)]
    pub floor_index: Option<i32>,
    #[serde(default)]
    pub has_temp_sensor: Option<bool>,
}

pub type PcieCardTable = BTreeMap<String, PcieCardEntry>;

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_config_round_trips_duration_as_seconds() {
        let zone = ZoneConfig {
            name: "zone0".into(),
            poweron_target: 5000,
            default_floor: 2000,
            default_ceiling: 10000,
            increase_delay: Duration::from_secs(5),
            decrease_interval: Duration::from_secs(30),
            thermal_mode_supported: vec!["Default".into()],
            thermal_mode_current: Some("Default".into()),
        };
        let json = serde_json::to_string(&zone).unwrap();
        let back: ZoneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.increase_delay, Duration::from_secs(5));
    }
}
