//! `mapped_floor` — a two-level lookup table keyed by a primary group's
//! maximum value and secondary groups' or parameters' values: condition
//! short-circuit, primary-key lookup, table walk, secondary lookup,
//! max-across-secondaries, offset clamp, then hold.

use crate::error::Result;
use crate::value::PropertyValue;

use super::{Action, ActionContext};

/// One `(value, floor)` pair in a secondary source's lookup list.
#[derive(Clone)]
pub struct FloorPoint {
    pub value: PropertyValue,
    pub floor: u64,
}

/// A secondary lookup source: either a group (its max numeric value is
/// used) or a named parameter from C6.
#[derive(Clone)]
pub enum SecondarySource {
    Group { name: String, points: Vec<FloorPoint> },
    Parameter { name: String, points: Vec<FloorPoint> },
}

/// One entry in the primary `fan_floors` table.
#[derive(Clone)]
pub struct FanFloorEntry {
    pub key_value: f64,
    pub secondary: Vec<SecondarySource>,
    pub default_floor: Option<u64>,
    /// Signed offset parameter name, applied to this entry's resolved
    /// floor after the secondary lookup.
    pub offset_parameter: Option<String>,
}

pub struct MappedFloor {
    ident: String,
    /// Optional short-circuit: (group, expected value, run_when_equal).
    condition: Option<(String, PropertyValue, bool)>,
    primary_group: String,
    fan_floors: Vec<FanFloorEntry>,
    action_default: u64,
    held_floor: Option<u64>,
}

impl MappedFloor {
    pub fn new(ident: impl Into<String>, primary_group: impl Into<String>, action_default: u64) -> Self {
        Self {
            ident: ident.into(),
            condition: None,
            primary_group: primary_group.into(),
            fan_floors: Vec::new(),
            action_default,
            held_floor: None,
        }
    }

    pub fn with_condition(mut self, group: impl Into<String>, value: PropertyValue, run_when_equal: bool) -> Self {
        self.condition = Some((group.into(), value, run_when_equal));
        self
    }

    pub fn with_entries(mut self, entries: Vec<FanFloorEntry>) -> Self {
        self.fan_floors = entries;
        self
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

    fn secondary_value(source: &SecondarySource, ctx: &ActionContext<'_>) -> Option<PropertyValue> {
        match source {
            SecondarySource::Group { name, .. } => Self::group_max(ctx, name).map(PropertyValue::Double),
            SecondarySource::Parameter { name, .. } => ctx.params.get(name).cloned(),
        }
    }

    fn secondary_points(source: &SecondarySource) -> &[FloorPoint] {
        match source {
            SecondarySource::Group { points, .. } | SecondarySource::Parameter { points, .. } => points,
        }
    }

    /// Step 4: find the first `(value, floor)` pair matching `observed`.
    fn lookup_floor(points: &[FloorPoint], observed: &PropertyValue) -> Option<u64> {
        points.iter().find_map(|p| {
            let matches = match (observed.as_f64(), p.value.as_f64()) {
                (Some(o), Some(v)) => o <= v,
                _ => *observed == p.value,
            };
            matches.then_some(p.floor)
        })
    }
}

impl Action for MappedFloor {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        // Step 1: optional condition short-circuit.
        if let Some((group, expected, run_when_equal)) = &self.condition {
            let matches = ctx
                .group(group)
                .and_then(|g| g.members.first())
                .and_then(|p| {
                    let g = ctx.group(group)?;
                    ctx.cache.get_value(p, &g.interface, &g.property)
                })
                .is_some_and(|v| v == expected);
            if matches != *run_when_equal {
                if self.held_floor.is_some() {
                    ctx.zone.set_floor_hold(self.ident.clone(), 0, false, ctx.fans);
                    self.held_floor = None;
                }
                return Ok(());
            }
        }

        // Step 2: primary key, or action default on no members.
        let Some(key) = Self::group_max(ctx, &self.primary_group) else {
            self.apply(ctx, self.action_default);
            return Ok(());
        };

        // Step 3: first entry whose key_value exceeds the primary key.
        let Some(entry) = self.fan_floors.iter().find(|e| key < e.key_value).cloned() else {
            self.apply(ctx, self.action_default);
            return Ok(());
        };

        // Steps 4-5: max floor across secondary sources.
        let mut chosen: Option<u64> = None;
        for source in &entry.secondary {
            let Some(observed) = Self::secondary_value(source, ctx) else { continue };
            if let Some(floor) = Self::lookup_floor(Self::secondary_points(source), &observed) {
                chosen = Some(chosen.map_or(floor, |c: u64| c.max(floor)));
            }
        }
        let mut floor = chosen
            .or(entry.default_floor)
            .unwrap_or(self.action_default);

        // Step 6: signed offset, clamped up to the prior floor.
        if let Some(param) = &entry.offset_parameter {
            if let Some(offset) = ctx.params.get(param).and_then(PropertyValue::as_i64) {
                let prior = floor;
                let adjusted = floor as i64 + offset;
                floor = if adjusted < 0 { prior } else { adjusted as u64 };
            }
        }

        self.apply(ctx, floor);
        Ok(())
    }
}

impl MappedFloor {
    fn apply(&mut self, ctx: &mut ActionContext<'_>, floor: u64) {
        if self.held_floor != Some(floor) {
            if self.held_floor.is_some() {
                ctx.zone.set_floor_hold(self.ident.clone(), floor, false, ctx.fans);
            }
            ctx.zone.set_floor_hold(self.ident.clone(), floor, true, ctx.fans);
            self.held_floor = Some(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::fan::Fan;
    use crate::group::Group;
    use crate::parameter_store::ParameterStore;
    use crate::zone::Zone;
    use std::collections::BTreeMap;

    #[test]
    fn walks_entries_in_declaration_order_and_picks_max_secondary() {
        let mut cache = ObjectCache::new();
        cache.set_property("/ambient", "xyz.Temp", "Value", PropertyValue::Double(30.0));
        cache.set_property("/cpu0", "xyz.Temp", "Value", PropertyValue::Double(70.0));

        let mut groups = BTreeMap::new();
        groups.insert("ambient".into(), Group::new("ambient", "xyz.Temp", "Value").with_members(["/ambient"]));
        groups.insert("cpu".into(), Group::new("cpu", "xyz.Temp", "Value").with_members(["/cpu0"]));

        let mut action = MappedFloor::new("mf1", "ambient", 10).with_entries(vec![FanFloorEntry {
            key_value: 40.0,
            secondary: vec![SecondarySource::Group {
                name: "cpu".into(),
                points: vec![
                    FloorPoint { value: PropertyValue::Double(60.0), floor: 30 },
                    FloorPoint { value: PropertyValue::Double(80.0), floor: 50 },
                ],
            }],
            default_floor: Some(20),
            offset_parameter: None,
        }]);

        let mut params = ParameterStore::new();
        let mut zone = Zone::new("z1", 100, 5, 20);
        let mut fans = BTreeMap::new();
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.zone.floor(), 50);
    }

    #[test]
    fn no_primary_members_applies_action_default() {
        let cache = ObjectCache::new();
        let mut groups = BTreeMap::new();
        groups.insert("ambient".into(), Group::new("ambient", "xyz.Temp", "Value"));
        let mut action = MappedFloor::new("mf1", "ambient", 15);
        let mut params = ParameterStore::new();
        let mut zone = Zone::new("z1", 100, 5, 20);
        let mut fans = BTreeMap::new();
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.zone.floor(), 15);
    }
}
