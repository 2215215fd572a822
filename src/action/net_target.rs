//! `net_target_increase` / `net_target_decrease`: fold a
//! group's numeric/boolean/string members against a state value into a
//! single increase or decrease request submitted to the zone.

use crate::error::Result;
use crate::group::Group;
use crate::value::PropertyValue;

use super::{Action, ActionContext};

/// Where the comparison `state` comes from: a fixed configured value,
/// or the max value of a separate group with an optional arithmetic
/// modifier.
#[derive(Clone)]
pub enum StateSource {
    Fixed(PropertyValue),
    GroupMax { group: String, subtract: i64 },
}

fn resolve_state(ctx: &ActionContext<'_>, source: &StateSource) -> Option<PropertyValue> {
    match source {
        StateSource::Fixed(v) => Some(v.clone()),
        StateSource::GroupMax { group, subtract } => {
            let max = group_max(ctx, group)?;
            Some(PropertyValue::Int64(max as i64 - subtract))
        }
    }
}

fn group_max(ctx: &ActionContext<'_>, group_name: &str) -> Option<f64> {
    let group = ctx.group(group_name)?;
    group
        .members
        .iter()
        .filter_map(|path| ctx.cache.get_value(path, &group.interface, &group.property))
        .filter_map(PropertyValue::as_f64)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

fn member_values<'a>(ctx: &'a ActionContext<'_>, group: &'a Group) -> impl Iterator<Item = &'a PropertyValue> + 'a {
    group
        .members
        .iter()
        .filter_map(move |path| ctx.cache.get_value(path, &group.interface, &group.property))
}

pub struct NetTargetIncrease {
    ident: String,
    group: String,
    state_source: StateSource,
    delta: u64,
}

impl NetTargetIncrease {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, state_source: StateSource, delta: u64) -> Self {
        Self { ident: ident.into(), group: group.into(), state_source, delta }
    }
}

impl Action for NetTargetIncrease {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(state) = resolve_state(ctx, &self.state_source) else { return Ok(()) };
        let Some(group) = ctx.group(&self.group).cloned() else { return Ok(()) };

        let mut max_request: u64 = 0;
        for value in member_values(ctx, &group) {
            let request = if value.is_numeric() && state.is_numeric() {
                let (Some(m), Some(s)) = (value.as_f64(), state.as_f64()) else { continue };
                if m >= s {
                    let diff = ((m - s) * self.delta as f64) as i64;
                    diff.max(self.delta as i64) as u64
                } else {
                    0
                }
            } else if *value == state {
                self.delta
            } else {
                0
            };
            max_request = max_request.max(request);
        }

        if max_request > 0 {
            ctx.zone.request_increase(max_request, ctx.fans);
        }
        Ok(())
    }
}

pub struct NetTargetDecrease {
    ident: String,
    group: String,
    state_source: StateSource,
    delta: u64,
}

impl NetTargetDecrease {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, state_source: StateSource, delta: u64) -> Self {
        Self { ident: ident.into(), group: group.into(), state_source, delta }
    }
}

impl Action for NetTargetDecrease {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(state) = resolve_state(ctx, &self.state_source) else { return Ok(()) };
        let Some(group) = ctx.group(&self.group).cloned() else { return Ok(()) };

        let mut min_request: Option<u64> = None;
        let mut any_at_or_above = false;
        for value in member_values(ctx, &group) {
            if value.is_numeric() && state.is_numeric() {
                let (Some(m), Some(s)) = (value.as_f64(), state.as_f64()) else { continue };
                if m >= s {
                    any_at_or_above = true;
                } else {
                    let diff = ((s - m) * self.delta as f64) as u64;
                    let request = diff.max(self.delta);
                    min_request = Some(min_request.map_or(request, |r| r.min(request)));
                }
            }
        }

        if any_at_or_above {
            return Ok(());
        }
        if let Some(delta) = min_request {
            ctx.zone.request_decrease(delta);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::fan::Fan;
    use crate::parameter_store::ParameterStore;
    use crate::zone::Zone;
    use std::collections::BTreeMap;

    fn fixture() -> (ObjectCache, BTreeMap<String, Group>, ParameterStore, Zone, BTreeMap<String, Fan>) {
        let mut cache = ObjectCache::new();
        cache.set_property("/t0", "xyz.Temp", "Value", PropertyValue::Double(60.0));
        let mut groups = BTreeMap::new();
        groups.insert("temps".to_string(), Group::new("temps", "xyz.Temp", "Value").with_members(["/t0"]));
        (cache, groups, ParameterStore::new(), Zone::new("z1", 100, 10, 50), BTreeMap::new())
    }

    #[test]
    fn increase_scales_by_delta_above_state() {
        let (cache, groups, mut params, mut zone, mut fans) = fixture();
        let mut action = NetTargetIncrease::new("i1", "temps", StateSource::Fixed(PropertyValue::Double(50.0)), 2);
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert!(ctx.zone.target() > 50);
    }

    #[test]
    fn decrease_is_zero_when_any_member_at_or_above_state() {
        let (cache, groups, mut params, mut zone, mut fans) = fixture();
        let mut action = NetTargetDecrease::new("d1", "temps", StateSource::Fixed(PropertyValue::Double(50.0)), 2);
        zone.set_target(80, &mut fans);
        let before = zone.target();
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        ctx.zone.decrease_timer_expired(ctx.fans);
        assert_eq!(ctx.zone.target(), before);
    }
}
