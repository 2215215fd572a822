//! `set_parameter_from_group` / `set_parameter_from_group_max`: read a
//! member's (or the members' max) value, optionally modify it, and
//! write it into the parameter store. NaN removal and erasure are both
//! modeled as "write absent".

use crate::error::Result;
use crate::value::PropertyValue;

use super::{Action, ActionContext};

/// Arithmetic applied to a numeric value before it's written.
#[derive(Clone, Copy)]
pub enum Modifier {
    None,
    Add(i64),
    Subtract(i64),
}

impl Modifier {
    fn apply(self, v: f64) -> f64 {
        match self {
            Modifier::None => v,
            Modifier::Add(n) => v + n as f64,
            Modifier::Subtract(n) => v - n as f64,
        }
    }
}

pub struct SetParameterFromGroup {
    ident: String,
    group: String,
    member_index: usize,
    modifier: Modifier,
    parameter: String,
}

impl SetParameterFromGroup {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self { ident: ident.into(), group: group.into(), member_index: 0, modifier: Modifier::None, parameter: parameter.into() }
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }
}

impl Action for SetParameterFromGroup {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group).cloned() else { return Ok(()) };
        let Some(path) = group.members.get(self.member_index) else { return Ok(()) };
        let Some(value) = ctx.cache.get_value(path, &group.interface, &group.property) else {
            ctx.params.remove(&self.parameter);
            return Ok(());
        };

        match value.as_f64() {
            Some(n) => {
                let adjusted = self.modifier.apply(n);
                match PropertyValue::double(adjusted) {
                    Some(v) => {
                        ctx.params.set(self.parameter.clone(), v);
                    }
                    None => {
                        ctx.params.remove(&self.parameter);
                    }
                }
            }
            None => {
                ctx.params.set(self.parameter.clone(), value.clone());
            }
        }
        Ok(())
    }
}

pub struct SetParameterFromGroupMax {
    ident: String,
    group: String,
    modifier: Modifier,
    parameter: String,
}

impl SetParameterFromGroupMax {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self { ident: ident.into(), group: group.into(), modifier: Modifier::None, parameter: parameter.into() }
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }
}

impl Action for SetParameterFromGroupMax {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group).cloned() else { return Ok(()) };
        let max = group
            .members
            .iter()
            .filter_map(|path| ctx.cache.get_value(path, &group.interface, &group.property))
            .filter_map(PropertyValue::as_f64)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        match max {
            Some(m) => match PropertyValue::double(self.modifier.apply(m)) {
                Some(v) => {
                    ctx.params.set(self.parameter.clone(), v);
                }
                None => {
                    ctx.params.remove(&self.parameter);
                }
            },
            None => {
                ctx.params.remove(&self.parameter);
            }
        }
        Ok(())
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
    fn writes_adjusted_max_across_members() {
        let mut cache = ObjectCache::new();
        cache.set_property("/t0", "xyz.Temp", "Value", PropertyValue::Double(40.0));
        cache.set_property("/t1", "xyz.Temp", "Value", PropertyValue::Double(55.0));
        let mut groups = BTreeMap::new();
        groups.insert("temps".into(), Group::new("temps", "xyz.Temp", "Value").with_members(["/t0", "/t1"]));
        let mut params = ParameterStore::new();
        let mut zone = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        let mut action = SetParameterFromGroupMax::new("p1", "temps", "max_temp").with_modifier(Modifier::Subtract(5));
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.params.get("max_temp"), Some(&PropertyValue::Double(50.0)));
    }

    #[test]
    fn no_cached_members_erases_parameter() {
        let cache = ObjectCache::new();
        let mut groups = BTreeMap::new();
        groups.insert("temps".into(), Group::new("temps", "xyz.Temp", "Value").with_members(["/t0"]));
        let mut params = ParameterStore::new();
        params.set("max_temp", PropertyValue::Double(10.0));
        let mut zone = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        let mut action = SetParameterFromGroupMax::new("p1", "temps", "max_temp");
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.params.get("max_temp"), None);
    }
}
