//! Control Manager (C9) — loads profiles/zones/fans/groups/events from
//! layered JSON, drives power-state dispatch, and services reload
//! (SIGHUP) and debug-dump (SIGUSR1) requests.
//!
//! Construction loads static configuration once; the owning binary's
//! event loop then calls into `on_power_on`/`on_power_off`/`reload`/
//! `dump` as broker signals and Unix signals arrive.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;

use crate::action::{Action, ActionContext};
use crate::broker::{BrokerEvent, ObjectBroker};
use crate::cache::ObjectCache;
use crate::config::{self, ConfigRoots, EventConfig, FanConfig, GroupConfig, ProfileConfig, ZoneConfig};
use crate::error::{ConfigParseError, Error, Result};
use crate::fan::Fan;
use crate::flight_recorder::FlightRecorder;
use crate::group::Group;
use crate::parameter_store::ParameterStore;
use crate::registry;
use crate::trigger::{self, InitMethod, SignalClass, TimerKind, Trigger};
use crate::value::PropertyValue;
use crate::zone::Zone;

/// One configured action instance plus the zones it's bound to.
pub struct ActionBinding {
    pub zones: Vec<String>,
    pub action: Box<dyn Action + Send>,
}

/// Everything loaded from one generation of configuration. Replaced
/// wholesale on a successful reload; kept on a failed one — reload is
/// atomic, with rollback on failure.
pub struct LoadedConfig {
    pub profiles: Vec<ProfileConfig>,
    pub zones: BTreeMap<String, Zone>,
    pub fans: BTreeMap<String, Fan>,
    pub groups: BTreeMap<String, Group>,
    pub events: Vec<EventConfig>,
    pub actions: BTreeMap<String, ActionBinding>,
    pub triggers: Vec<Trigger>,
}

impl LoadedConfig {
    fn load(roots: &ConfigRoots) -> Result<Self> {
        let profiles: Vec<ProfileConfig> = load_optional(roots, "profiles.json")?.unwrap_or_default();

        let fan_configs: Vec<FanConfig> = load_required(roots, "fans.json")?;
        let zone_configs: Vec<ZoneConfig> = load_required(roots, "zones.json")?;
        let group_configs: Vec<GroupConfig> = load_required(roots, "groups.json")?;
        let events: Vec<EventConfig> = load_optional(roots, "events.json")?.unwrap_or_default();

        let mut zones = BTreeMap::new();
        for zc in &zone_configs {
            zones.insert(
                zc.name.clone(),
                Zone::new(zc.name.clone(), zc.default_ceiling, zc.default_floor, zc.poweron_target),
            );
        }

        let mut fans = BTreeMap::new();
        for fc in &fan_configs {
            let mut fan = Fan::new(fc.name.clone(), fc.interface.clone());
            for sensor in &fc.sensors {
                fan.add_sensor(sensor.clone(), String::new());
            }
            fans.insert(fc.name.clone(), fan);
            if let Some(zone) = zones.get_mut(&fc.zone) {
                zone.fans.push(fc.name.clone());
            }
        }

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for gc in &group_configs {
            let mut group = Group::new(gc.name.clone(), gc.interface.clone(), gc.property.clone())
                .with_members(gc.members.clone());
            group.service = gc.service.clone();
            group.expected_value = gc.expected_value.clone();

            match groups.get_mut(&gc.name) {
                Some(existing) if existing.identity_key() == group.identity_key() => {
                    existing.merge(&group);
                }
                Some(existing) => {
                    warn!(
                        "group {}: redeclared with a different interface/property ({}.{} vs {}.{}); keeping the later declaration",
                        gc.name, existing.interface, existing.property, group.interface, group.property
                    );
                    *existing = group;
                }
                None => {
                    groups.insert(gc.name.clone(), group);
                }
            }
        }

        let mut actions: BTreeMap<String, ActionBinding> = BTreeMap::new();
        let mut triggers: Vec<Trigger> = Vec::new();
        for ev in &events {
            for raw in &ev.actions {
                match registry::build_action(raw) {
                    Ok((name, zones, action)) => {
                        actions.insert(name, ActionBinding { zones, action });
                    }
                    Err(e) => warn!("event {}: failed to build action: {e}", ev.name),
                }
            }
            for raw in &ev.triggers {
                match registry::parse_trigger(raw) {
                    Ok((_, trigger)) => triggers.push(trigger),
                    Err(e) => warn!("event {}: failed to parse trigger: {e}", ev.name),
                }
            }
        }

        Ok(Self { profiles, zones, fans, groups, events, actions, triggers })
    }

    /// Whether `profile` is currently active: every `all_of` equality
    /// holds against the cache.
    pub fn profile_active(&self, name: &str, cache: &ObjectCache) -> bool {
        let Some(profile) = self.profiles.iter().find(|p| p.name == name) else { return false };
        profile.all_of.iter().all(|eq| {
            cache
                .get_value(&eq.path, &eq.interface, &eq.property)
                .is_some_and(|v| *v == eq.value)
        })
    }

    /// Events eligible under the currently active profile set: empty
    /// `profiles` means "always eligible".
    pub fn eligible_events<'a>(&'a self, cache: &'a ObjectCache) -> impl Iterator<Item = &'a EventConfig> + 'a {
        self.events.iter().filter(move |e| {
            e.profiles.is_empty() || e.profiles.iter().any(|p| self.profile_active(p, cache))
        })
    }
}

fn load_required<T: serde::de::DeserializeOwned>(roots: &ConfigRoots, file: &str) -> Result<T> {
    let path = config::resolve_config_path(roots, file)
        .ok_or_else(|| Error::ConfigParse(ConfigParseError::new(file, "not found in any search path")))?;
    config::load_json(&path)
}

fn load_optional<T: serde::de::DeserializeOwned>(roots: &ConfigRoots, file: &str) -> Result<Option<T>> {
    match config::resolve_config_path(roots, file) {
        Some(path) => config::load_json(&path).map(Some),
        None => Ok(None),
    }
}

/// Snapshot serialized to `/tmp/fan_{control,monitor}_dump.json` on
/// SIGUSR1.
#[derive(Serialize)]
pub struct DumpSnapshot {
    pub flight_recorder: String,
    pub zones: BTreeMap<String, ZoneSnapshot>,
}

#[derive(Serialize)]
pub struct ZoneSnapshot {
    pub target: u64,
    pub floor: u64,
    pub active: bool,
}

pub struct ControlManager {
    pub cache: ObjectCache,
    pub params: ParameterStore,
    pub flight_recorder: FlightRecorder,
    pub config: LoadedConfig,
    power_is_on: bool,
    dump_path: PathBuf,
    /// Next-fire instant per entry in `config.triggers`, `None` for
    /// every non-timer trigger. Rebuilt wholesale alongside `config` on
    /// load/reload.
    timer_next: Vec<Option<Instant>>,
    /// Last value observed for each parameter a `Trigger::Parameter`
    /// watches, used to detect the write-that-changes-the-value C6
    /// requires before re-firing.
    parameter_snapshots: BTreeMap<String, Option<PropertyValue>>,
}

impl ControlManager {
    pub fn load(roots: &ConfigRoots, dump_path: impl Into<PathBuf>) -> Result<Self> {
        let config = LoadedConfig::load(roots)?;
        let timer_next = Self::build_timer_next(&config.triggers);
        Ok(Self {
            cache: ObjectCache::new(),
            params: ParameterStore::new(),
            flight_recorder: FlightRecorder::new(),
            config,
            power_is_on: false,
            dump_path: dump_path.into(),
            timer_next,
            parameter_snapshots: BTreeMap::new(),
        })
    }

    fn build_timer_next(triggers: &[Trigger]) -> Vec<Option<Instant>> {
        let now = Instant::now();
        triggers
            .iter()
            .map(|t| match t {
                Trigger::Timer { period, preload, .. } => Some(if *preload { now } else { now + *period }),
                _ => None,
            })
            .collect()
    }

    /// Service SIGHUP: rebuild configuration from `roots`, keeping the
    /// previous generation (and the object cache) if the rebuild fails.
    pub fn reload(&mut self, roots: &ConfigRoots) {
        match LoadedConfig::load(roots) {
            Ok(new_config) => {
                info!("reload: configuration rebuilt");
                self.timer_next = Self::build_timer_next(&new_config.triggers);
                self.config = new_config;
            }
            Err(e) => {
                error!("reload failed, keeping previous configuration: {e}");
            }
        }
    }

    /// Run one configured action against every zone it's bound to, then
    /// re-fire any parameter trigger the action's writes satisfied.
    pub fn run_action(&mut self, name: &str) {
        self.run_action_inner(name);
        self.fire_parameter_triggers();
    }

    /// `run_action`'s body without the parameter-trigger follow-up, so
    /// that follow-up itself can dispatch actions without recursing
    /// forever on a parameter write that keeps rewriting itself.
    fn run_action_inner(&mut self, name: &str) {
        let Some(zones) = self.config.actions.get(name).map(|b| b.zones.clone()) else { return };
        for zone_name in &zones {
            if !self.config.zones.contains_key(zone_name) {
                continue;
            }
            let cache = &self.cache;
            let groups = &self.config.groups;
            let params = &mut self.params;
            let zone = self.config.zones.get_mut(zone_name).unwrap();
            let fans = &mut self.config.fans;
            let mut ctx = ActionContext { cache, groups, params, zone, fans };
            if let Some(binding) = self.config.actions.get_mut(name) {
                if let Err(e) = binding.action.run(&mut ctx) {
                    warn!("action {name}: {e}");
                }
            }
        }
    }

    /// Check every `Trigger::Parameter`'s watched key against its last
    /// observed value; a real change (per [`trigger::parameter_write_changed`])
    /// re-runs its bound actions exactly once. One pass only: an action
    /// triggered this way that itself rewrites the same parameter does
    /// not cascade further within this call.
    fn fire_parameter_triggers(&mut self) {
        let mut to_run: Vec<String> = Vec::new();
        for t in &self.config.triggers {
            let Trigger::Parameter { parameter, actions } = t else { continue };
            let current = self.params.snapshot(parameter);
            let previous = self.parameter_snapshots.get(parameter).cloned().flatten();
            if trigger::parameter_write_changed(previous.as_ref(), current.as_ref()) {
                self.parameter_snapshots.insert(parameter.clone(), current);
                to_run.extend(actions.iter().cloned());
            }
        }
        to_run.sort();
        to_run.dedup();
        for name in to_run {
            self.run_action_inner(&name);
        }
    }

    /// Run every `Init` trigger's actions once, priming their groups
    /// from the broker first.
    pub fn fire_init_triggers(&mut self, broker: &dyn ObjectBroker) {
        let pending: Vec<(InitMethod, Vec<String>, Vec<String>)> = self
            .config
            .triggers
            .iter()
            .filter_map(|t| match t {
                Trigger::Init { method, groups, actions } => Some((*method, groups.clone(), actions.clone())),
                _ => None,
            })
            .collect();

        for (method, groups, _) in &pending {
            for group_name in groups {
                self.prime_group(group_name, *method, broker);
            }
        }
        for (_, _, actions) in &pending {
            for name in actions {
                self.run_action(name);
            }
        }
    }

    fn prime_group(&mut self, group_name: &str, method: InitMethod, broker: &dyn ObjectBroker) {
        let Some(group) = self.config.groups.get(group_name).cloned() else { return };
        match method {
            InitMethod::GetProperties => {
                for member in &group.members {
                    if let Ok(value) = broker.get_property(member, &group.interface, &group.property) {
                        self.cache.set_property(member, &group.interface, &group.property, value);
                        if let Some(service) = &group.service {
                            self.cache.record_owner(member, &group.interface, service);
                        }
                    }
                }
            }
            InitMethod::NameHasOwner => {
                if let Some(service) = &group.service {
                    let owned = broker.name_has_owner(service);
                    self.cache.set_owner(service, owned);
                }
            }
        }
    }

    /// Apply a batch of broker signals to the cache and run every
    /// `Signal` trigger's actions that matched one of them.
    pub fn process_broker_events(&mut self, events: Vec<BrokerEvent>) {
        let mut fired: Vec<String> = Vec::new();
        for event in &events {
            match event {
                BrokerEvent::PropertiesChanged { path, interface, properties } => {
                    for (prop, value) in properties {
                        self.cache.set_property(path, interface, prop, value.clone());
                    }
                    self.collect_signal_actions(SignalClass::PropertiesChanged, path, interface, &mut fired);
                }
                BrokerEvent::InterfacesAdded { path, interfaces } => {
                    for (interface, props) in interfaces {
                        for (prop, value) in props {
                            self.cache.set_property(path, interface, prop, value.clone());
                        }
                        self.collect_signal_actions(SignalClass::InterfacesAdded, path, interface, &mut fired);
                    }
                }
                BrokerEvent::InterfacesRemoved { path, interfaces } => {
                    for interface in interfaces {
                        self.cache.remove_interface(path, interface);
                        self.collect_signal_actions(SignalClass::InterfacesRemoved, path, interface, &mut fired);
                    }
                }
                BrokerEvent::NameOwnerChanged { service, owned } => {
                    self.cache.set_owner(service, *owned);
                    for trigger in &self.config.triggers {
                        if let Trigger::Signal { classes, actions, .. } = trigger {
                            if classes.contains(&SignalClass::NameOwnerChanged) {
                                fired.extend(actions.iter().cloned());
                            }
                        }
                    }
                }
                BrokerEvent::Member { path, interface, .. } => {
                    self.collect_signal_actions(SignalClass::Member, path, interface, &mut fired);
                }
            }
        }
        fired.sort();
        fired.dedup();
        for name in fired {
            self.run_action(&name);
        }
    }

    fn collect_signal_actions(&self, class: SignalClass, path: &str, interface: &str, out: &mut Vec<String>) {
        for trigger in &self.config.triggers {
            let Trigger::Signal { classes, groups, actions } = trigger else { continue };
            if !classes.contains(&class) {
                continue;
            }
            let matches_group = groups
                .iter()
                .any(|g| self.config.groups.get(g).is_some_and(|grp| grp.interface == interface && grp.contains(path)));
            if matches_group {
                out.extend(actions.iter().cloned());
            }
        }
    }

    /// Fire every `Timer` trigger whose next-fire instant has elapsed,
    /// rescheduling repeating timers and retiring one-shots.
    pub fn tick_timers(&mut self, now: Instant) {
        let due: Vec<(usize, Vec<String>, TimerKind)> = self
            .config
            .triggers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t {
                Trigger::Timer { kind, actions, .. } if self.timer_next.get(i).copied().flatten().is_some_and(|t| now >= t) => {
                    Some((i, actions.clone(), *kind))
                }
                _ => None,
            })
            .collect();

        for (i, actions, kind) in due {
            for name in &actions {
                self.run_action(name);
            }
            if let Some(Trigger::Timer { period, .. }) = self.config.triggers.get(i) {
                self.timer_next[i] = match kind {
                    TimerKind::Repeating => Some(now + *period),
                    TimerKind::OneShot => None,
                };
            }
        }
    }

    /// Power-on transition: every zone's target snaps to its
    /// `poweron_target`.
    pub fn on_power_on(&mut self) {
        self.power_is_on = true;
        for (name, zone) in &mut self.config.zones {
            let target = zone.poweron_target;
            zone.set_target(target, &mut self.config.fans);
            info!("zone {name}: power on, target -> {target}");
        }
    }

    /// Power-off transition: no in-flight change is canceled.
    pub fn on_power_off(&mut self) {
        self.power_is_on = false;
        warn!("power off dispatched to all events");
    }

    pub fn is_power_on(&self) -> bool {
        self.power_is_on
    }

    /// Service SIGUSR1: build and persist the debug-dump snapshot.
    pub fn dump(&self) -> Result<()> {
        let snapshot = DumpSnapshot {
            flight_recorder: self.flight_recorder.dump_text(),
            zones: self
                .config
                .zones
                .iter()
                .map(|(name, z)| (name.clone(), ZoneSnapshot { target: z.target(), floor: z.floor(), active: z.is_active() }))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::ConfigParse(ConfigParseError::new("dump", e.to_string())))?;
        std::fs::write(&self.dump_path, json)
            .map_err(|e| Error::ConfigParse(ConfigParseError::new("dump", e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_minimal_config(dir: &std::path::Path) {
        fs::write(dir.join("fans.json"), r#"[{"name":"fan0","interface":"xyz.Target","zone":"zone0","sensors":["/fan0"]}]"#).unwrap();
        fs::write(
            dir.join("zones.json"),
            r#"[{"name":"zone0","poweron_target":5000,"default_floor":2000,"default_ceiling":10000,"increase_delay":5,"decrease_interval":30,"thermal_mode_supported":[]}]"#,
        )
        .unwrap();
        fs::write(dir.join("groups.json"), "[]").unwrap();
    }

    #[test]
    fn load_builds_zones_and_fans_from_json() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_config(dir.path());
        let mut roots = ConfigRoots::new("phosphor-fand");
        roots.etc_root = dir.path().to_path_buf();
        roots.share_root = dir.path().join("unused");
        // load_required looks directly under etc_root/app_name; point both there.
        fs::create_dir_all(dir.path().join("phosphor-fand")).unwrap();
        for f in ["fans.json", "zones.json", "groups.json"] {
            fs::rename(dir.path().join(f), dir.path().join("phosphor-fand").join(f)).unwrap();
        }

        let manager = ControlManager::load(&roots, dir.path().join("dump.json")).unwrap();
        assert!(manager.config.zones.contains_key("zone0"));
        assert!(manager.config.fans.contains_key("fan0"));
        assert_eq!(manager.config.zones["zone0"].fans, vec!["fan0".to_string()]);
    }

    #[test]
    fn reload_keeps_previous_config_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("phosphor-fand")).unwrap();
        write_minimal_config(&dir.path().join("phosphor-fand"));
        let mut roots = ConfigRoots::new("phosphor-fand");
        roots.etc_root = dir.path().to_path_buf();
        roots.share_root = dir.path().join("unused");

        let mut manager = ControlManager::load(&roots, dir.path().join("dump.json")).unwrap();
        fs::write(dir.path().join("phosphor-fand/zones.json"), "{not valid json").unwrap();
        manager.reload(&roots);
        assert!(manager.config.zones.contains_key("zone0"));
    }

    #[test]
    fn power_on_sets_every_zone_to_its_poweron_target() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("phosphor-fand")).unwrap();
        write_minimal_config(&dir.path().join("phosphor-fand"));
        let mut roots = ConfigRoots::new("phosphor-fand");
        roots.etc_root = dir.path().to_path_buf();
        roots.share_root = dir.path().join("unused");

        let mut manager = ControlManager::load(&roots, dir.path().join("dump.json")).unwrap();
        manager.on_power_on();
        assert_eq!(manager.config.zones["zone0"].target(), 5000);
        assert!(manager.is_power_on());
    }

    #[test]
    fn parameter_trigger_fires_once_on_change_and_not_on_noop_rewrite() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingAction(Arc<AtomicUsize>);
        impl Action for CountingAction {
            fn identity(&self) -> &str {
                "counter"
            }
            fn run(&mut self, _ctx: &mut ActionContext<'_>) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("phosphor-fand")).unwrap();
        write_minimal_config(&dir.path().join("phosphor-fand"));
        let mut roots = ConfigRoots::new("phosphor-fand");
        roots.etc_root = dir.path().to_path_buf();
        roots.share_root = dir.path().join("unused");

        let mut manager = ControlManager::load(&roots, dir.path().join("dump.json")).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        manager.config.actions.insert(
            "bump".to_string(),
            ActionBinding { zones: vec!["zone0".to_string()], action: Box::new(CountingAction(count.clone())) },
        );
        manager.config.triggers.push(Trigger::Parameter { parameter: "p1".to_string(), actions: vec!["bump".to_string()] });

        // First write: p1 goes from unset to Some, a real change, so
        // running any action re-fires the parameter trigger too.
        manager.params.set("p1", PropertyValue::Int64(1));
        manager.run_action("bump");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // p1 unchanged this time: only the direct call runs.
        manager.run_action("bump");
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // A real change fires the trigger again.
        manager.params.set("p1", PropertyValue::Int64(2));
        manager.run_action("bump");
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
