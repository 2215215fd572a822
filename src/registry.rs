//! Config-to-runtime registry — turns the raw JSON trigger/action
//! blocks an [`crate::config::EventConfig`] carries into live
//! [`crate::trigger::Trigger`] and [`crate::action::Action`] instances.
//!
//! `events.json` declares triggers and actions by name and a bag of
//! parameters; this module is the one place that knows how each name
//! maps onto a concrete type. Anything named here but not recognized
//! is a configuration error, not a panic — callers get a `Result`.

use std::time::Duration;

use serde::Deserialize;

use crate::action::{
    Action, CallActionsBasedOnTimer, CardFloor, CountStateFloor, CountStateTarget, DefaultFloorOnMissingOwner,
    FanFloorEntry, FloorPoint, GetManagedObjects, MappedFloor, MissingOwnerTarget, Modifier, NetTargetDecrease,
    NetTargetIncrease, OverrideFanTarget, PcieCardFloors, PcieCardMetadata, SecondarySource, SetParameterFromGroup,
    SetParameterFromGroupMax, SpeedPoint, StateSource, TargetFromGroupMax,
};
use crate::error::{ConfigParseError, Error, Result};
use crate::trigger::{InitMethod, SignalClass, TimerKind, Trigger};
use crate::value::PropertyValue;

/// Name, zones, and action-list fields common to every action block,
/// recovered from the same JSON value `build_action` consumes. Unknown
/// fields (the action-specific ones) are ignored here by default.
#[derive(Deserialize)]
struct ActionMeta {
    name: String,
    #[serde(default)]
    zones: Vec<String>,
}

fn parse_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::ConfigParse(ConfigParseError::new(context, e.to_string()))
}

fn secondary_source(raw: &RawSecondary) -> SecondarySource {
    let points = raw
        .points
        .iter()
        .map(|p| FloorPoint { value: p.value.clone(), floor: p.floor })
        .collect();
    match raw.kind.as_str() {
        "parameter" => SecondarySource::Parameter { name: raw.name.clone(), points },
        _ => SecondarySource::Group { name: raw.name.clone(), points },
    }
}

#[derive(Deserialize)]
struct RawSecondary {
    #[serde(rename = "type", default = "default_group_kind")]
    kind: String,
    name: String,
    points: Vec<RawFloorPoint>,
}

fn default_group_kind() -> String {
    "group".to_string()
}

#[derive(Deserialize)]
struct RawFloorPoint {
    value: PropertyValue,
    floor: u64,
}

#[derive(Deserialize)]
struct RawFanFloorEntry {
    key_value: f64,
    #[serde(default)]
    secondary: Vec<RawSecondary>,
    #[serde(default)]
    default_floor: Option<u64>,
    #[serde(default)]
    offset_parameter: Option<String>,
}

#[derive(Deserialize)]
struct RawPcieCard {
    vendor_id: u16,
    device_id: u16,
    subsystem_vendor_id: u16,
    subsystem_id: u16,
    #[serde(default)]
    has_own_sensor: bool,
    #[serde(default)]
    floor_index: i32,
}

/// Tagged action specification: `"type"` selects the variant, the rest
/// of the object is the action's own constructor arguments.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ActionSpec {
    CountStateTarget { group: String, state: PropertyValue, threshold: u64, target: u64 },
    CountStateFloor { group: String, state: PropertyValue, threshold: u64, floor: u64, #[serde(default)] delay_ms: Option<u64> },
    MissingOwnerTarget { group: String, target: u64 },
    DefaultFloorOnMissingOwner { group: String, floor: u64 },
    MappedFloor {
        primary_group: String,
        action_default: u64,
        #[serde(default)]
        condition: Option<RawCondition>,
        #[serde(default)]
        fan_floors: Vec<RawFanFloorEntry>,
    },
    NetTargetIncrease { group: String, state: RawStateSource, delta: u64 },
    NetTargetDecrease { group: String, state: RawStateSource, delta: u64 },
    OverrideFanTarget { group: String, state: PropertyValue, count: u64, target: u64, fans: Vec<String> },
    SetParameterFromGroup { group: String, parameter: String, #[serde(default)] modifier: Option<RawModifier> },
    SetParameterFromGroupMax { group: String, parameter: String, #[serde(default)] modifier: Option<RawModifier> },
    PcieCardFloors { slots_group: String, parameter: String, #[serde(default)] cards: Vec<RawPcieCard>, #[serde(default)] settle_time_ms: Option<u64> },
    TargetFromGroupMax { group: String, table: Vec<SpeedPoint>, #[serde(default)] hysteresis: Option<(f64, f64)> },
    CallActionsBasedOnTimer { watch_group: String, #[serde(default)] sub_actions: Vec<serde_json::Value> },
    GetManagedObjects { groups: Vec<String>, #[serde(default)] sub_actions: Vec<serde_json::Value> },
}

#[derive(Deserialize)]
struct RawCondition {
    group: String,
    value: PropertyValue,
    #[serde(default = "default_true")]
    run_when_equal: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawStateSource {
    Fixed { value: PropertyValue },
    GroupMax { group: String, #[serde(default)] subtract: i64 },
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RawModifier {
    Add { amount: i64 },
    Subtract { amount: i64 },
}

impl From<RawModifier> for Modifier {
    fn from(raw: RawModifier) -> Self {
        match raw {
            RawModifier::Add { amount } => Modifier::Add(amount),
            RawModifier::Subtract { amount } => Modifier::Subtract(amount),
        }
    }
}

impl From<RawStateSource> for StateSource {
    fn from(raw: RawStateSource) -> Self {
        match raw {
            RawStateSource::Fixed { value } => StateSource::Fixed(value),
            RawStateSource::GroupMax { group, subtract } => StateSource::GroupMax { group, subtract },
        }
    }
}

/// Build one action from its raw JSON block, returning its name, the
/// zones it's bound to, and the live instance.
pub fn build_action(value: &serde_json::Value) -> Result<(String, Vec<String>, Box<dyn Action + Send>)> {
    let meta: ActionMeta = serde_json::from_value(value.clone()).map_err(|e| parse_error("action", e))?;
    let spec: ActionSpec = serde_json::from_value(value.clone()).map_err(|e| parse_error(&meta.name, e))?;

    let action: Box<dyn Action + Send> = match spec {
        ActionSpec::CountStateTarget { group, state, threshold, target } => {
            Box::new(CountStateTarget::new(meta.name.clone(), group, state, threshold, target))
        }
        ActionSpec::CountStateFloor { group, state, threshold, floor, delay_ms } => {
            let mut a = CountStateFloor::new(meta.name.clone(), group, state, threshold, floor);
            if let Some(ms) = delay_ms {
                a = a.with_delay(Duration::from_millis(ms));
            }
            Box::new(a)
        }
        ActionSpec::MissingOwnerTarget { group, target } => {
            Box::new(MissingOwnerTarget::new(meta.name.clone(), group, target))
        }
        ActionSpec::DefaultFloorOnMissingOwner { group, floor } => {
            Box::new(DefaultFloorOnMissingOwner::new(meta.name.clone(), group, floor))
        }
        ActionSpec::MappedFloor { primary_group, action_default, condition, fan_floors } => {
            let mut a = MappedFloor::new(meta.name.clone(), primary_group, action_default);
            if let Some(c) = condition {
                a = a.with_condition(c.group, c.value, c.run_when_equal);
            }
            let entries = fan_floors
                .into_iter()
                .map(|e| FanFloorEntry {
                    key_value: e.key_value,
                    secondary: e.secondary.iter().map(secondary_source).collect(),
                    default_floor: e.default_floor,
                    offset_parameter: e.offset_parameter,
                })
                .collect();
            Box::new(a.with_entries(entries))
        }
        ActionSpec::NetTargetIncrease { group, state, delta } => {
            Box::new(NetTargetIncrease::new(meta.name.clone(), group, state.into(), delta))
        }
        ActionSpec::NetTargetDecrease { group, state, delta } => {
            Box::new(NetTargetDecrease::new(meta.name.clone(), group, state.into(), delta))
        }
        ActionSpec::OverrideFanTarget { group, state, count, target, fans } => {
            Box::new(OverrideFanTarget::new(meta.name.clone(), group, state, count, target, fans))
        }
        ActionSpec::SetParameterFromGroup { group, parameter, modifier } => {
            let mut a = SetParameterFromGroup::new(meta.name.clone(), group, parameter);
            if let Some(m) = modifier {
                a = a.with_modifier(m.into());
            }
            Box::new(a)
        }
        ActionSpec::SetParameterFromGroupMax { group, parameter, modifier } => {
            let mut a = SetParameterFromGroupMax::new(meta.name.clone(), group, parameter);
            if let Some(m) = modifier {
                a = a.with_modifier(m.into());
            }
            Box::new(a)
        }
        ActionSpec::PcieCardFloors { slots_group, parameter, cards, settle_time_ms } => {
            let mut metadata = PcieCardMetadata::new();
            for c in cards {
                let key = (c.vendor_id, c.device_id, c.subsystem_vendor_id, c.subsystem_id);
                let floor = if c.has_own_sensor { CardFloor::HasOwnSensor } else { CardFloor::Index(c.floor_index) };
                metadata.insert(key, floor);
            }
            let mut a = PcieCardFloors::new(meta.name.clone(), slots_group, metadata, parameter);
            if let Some(ms) = settle_time_ms {
                a.settle_time = Duration::from_millis(ms);
            }
            Box::new(a)
        }
        ActionSpec::TargetFromGroupMax { group, table, hysteresis } => {
            let mut a = TargetFromGroupMax::new(meta.name.clone(), group, table);
            if let Some((pos, neg)) = hysteresis {
                a = a.with_hysteresis(pos, neg);
            }
            Box::new(a)
        }
        ActionSpec::CallActionsBasedOnTimer { watch_group, sub_actions } => {
            let mut built = Vec::with_capacity(sub_actions.len());
            for raw in &sub_actions {
                let (_, _, sub) = build_action(raw)?;
                built.push(sub);
            }
            Box::new(CallActionsBasedOnTimer::new(meta.name.clone(), watch_group, built))
        }
        ActionSpec::GetManagedObjects { groups, sub_actions } => {
            let mut built = Vec::with_capacity(sub_actions.len());
            for raw in &sub_actions {
                let (_, _, sub) = build_action(raw)?;
                built.push(sub);
            }
            Box::new(GetManagedObjects::new(meta.name.clone(), groups, built))
        }
    };

    Ok((meta.name, meta.zones, action))
}

#[derive(Deserialize)]
struct TriggerMeta {
    name: String,
}

/// Tagged trigger specification mirroring [`Trigger`]'s own shape.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TriggerSpec {
    Init { method: RawInitMethod, #[serde(default)] groups: Vec<String>, actions: Vec<String> },
    Signal { classes: Vec<RawSignalClass>, #[serde(default)] groups: Vec<String>, actions: Vec<String> },
    Timer { kind: RawTimerKind, period_ms: u64, #[serde(default)] preload: bool, #[serde(default)] groups: Vec<String>, actions: Vec<String> },
    Parameter { parameter: String, actions: Vec<String> },
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawInitMethod {
    GetProperties,
    NameHasOwner,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawSignalClass {
    PropertiesChanged,
    InterfacesAdded,
    InterfacesRemoved,
    NameOwnerChanged,
    Member,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawTimerKind {
    OneShot,
    Repeating,
}

/// Parse one trigger block, returning its declared name alongside the
/// live [`Trigger`].
pub fn parse_trigger(value: &serde_json::Value) -> Result<(String, Trigger)> {
    let meta: TriggerMeta = serde_json::from_value(value.clone()).map_err(|e| parse_error("trigger", e))?;
    let spec: TriggerSpec = serde_json::from_value(value.clone()).map_err(|e| parse_error(&meta.name, e))?;

    let trigger = match spec {
        TriggerSpec::Init { method, groups, actions } => Trigger::Init {
            method: match method {
                RawInitMethod::GetProperties => InitMethod::GetProperties,
                RawInitMethod::NameHasOwner => InitMethod::NameHasOwner,
            },
            groups,
            actions,
        },
        TriggerSpec::Signal { classes, groups, actions } => Trigger::Signal {
            classes: classes
                .into_iter()
                .map(|c| match c {
                    RawSignalClass::PropertiesChanged => SignalClass::PropertiesChanged,
                    RawSignalClass::InterfacesAdded => SignalClass::InterfacesAdded,
                    RawSignalClass::InterfacesRemoved => SignalClass::InterfacesRemoved,
                    RawSignalClass::NameOwnerChanged => SignalClass::NameOwnerChanged,
                    RawSignalClass::Member => SignalClass::Member,
                })
                .collect(),
            groups,
            actions,
        },
        TriggerSpec::Timer { kind, period_ms, preload, groups, actions } => Trigger::Timer {
            kind: match kind {
                RawTimerKind::OneShot => TimerKind::OneShot,
                RawTimerKind::Repeating => TimerKind::Repeating,
            },
            period: Duration::from_millis(period_ms),
            preload,
            groups,
            actions,
        },
        TriggerSpec::Parameter { parameter, actions } => Trigger::Parameter { parameter, actions },
    };

    Ok((meta.name, trigger))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_count_state_target_from_json() {
        let v = serde_json::json!({
            "name": "a1",
            "type": "count_state_target",
            "zones": ["zone0"],
            "group": "fans",
            "state": true,
            "threshold": 2,
            "target": 9000,
        });
        let (name, zones, action) = build_action(&v).unwrap();
        assert_eq!(name, "a1");
        assert_eq!(zones, vec!["zone0".to_string()]);
        assert_eq!(action.identity(), "a1");
    }

    #[test]
    fn builds_nested_timer_wrapped_sub_actions() {
        let v = serde_json::json!({
            "name": "t1",
            "type": "call_actions_based_on_timer",
            "watch_group": "fans",
            "sub_actions": [{
                "name": "inner",
                "type": "missing_owner_target",
                "group": "fans",
                "target": 10000,
            }],
        });
        let (name, _, action) = build_action(&v).unwrap();
        assert_eq!(name, "t1");
        assert_eq!(action.identity(), "t1");
    }

    #[test]
    fn unknown_action_type_is_a_config_error() {
        let v = serde_json::json!({"name": "bad", "type": "nonexistent_action"});
        assert!(build_action(&v).is_err());
    }

    #[test]
    fn parses_signal_trigger() {
        let v = serde_json::json!({
            "name": "s1",
            "type": "signal",
            "classes": ["properties_changed"],
            "groups": ["fans"],
            "actions": ["a1"],
        });
        let (name, trigger) = parse_trigger(&v).unwrap();
        assert_eq!(name, "s1");
        assert_eq!(trigger.actions(), &["a1".to_string()]);
    }
}
