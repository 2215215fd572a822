//! `override_fan_target`: when enough group members match a
//! state, lock a configured fan list at a fixed target; release the
//! lock when the count drops back below.

use crate::error::Result;
use crate::value::PropertyValue;

use super::{Action, ActionContext};

pub struct OverrideFanTarget {
    ident: String,
    group: String,
    state: PropertyValue,
    count: u64,
    target: u64,
    fans: Vec<String>,
    locked: bool,
}

impl OverrideFanTarget {
    pub fn new(
        ident: impl Into<String>,
        group: impl Into<String>,
        state: PropertyValue,
        count: u64,
        target: u64,
        fans: Vec<String>,
    ) -> Self {
        Self { ident: ident.into(), group: group.into(), state, count, target, fans, locked: false }
    }
}

impl Action for OverrideFanTarget {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group) else { return Ok(()) };
        let matching = group
            .members
            .iter()
            .filter_map(|path| ctx.cache.get_value(path, &group.interface, &group.property))
            .filter(|v| **v == self.state)
            .count() as u64;

        let should_lock = matching >= self.count;
        if should_lock == self.locked {
            return Ok(());
        }

        for name in &self.fans {
            if should_lock {
                ctx.zone.lock_fan_target(name, self.target, ctx.fans);
            } else {
                ctx.zone.unlock_fan_target(name, self.target, ctx.fans);
            }
        }
        self.locked = should_lock;
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
    fn locks_and_unlocks_configured_fans() {
        let mut cache = ObjectCache::new();
        cache.set_property("/s0", "xyz.Fault", "Value", PropertyValue::Bool(true));
        let mut groups = BTreeMap::new();
        groups.insert("faulted".into(), Group::new("faulted", "xyz.Fault", "Value").with_members(["/s0"]));
        let mut params = ParameterStore::new();
        let mut zone = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        fans.insert("fan0".to_string(), Fan::new("fan0", "xyz.Target"));

        let mut action = OverrideFanTarget::new("o1", "faulted", PropertyValue::Bool(true), 1, 100, vec!["fan0".into()]);
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(fans.get("fan0").unwrap().current_target(), 100);

        cache.set_property("/s0", "xyz.Fault", "Value", PropertyValue::Bool(false));
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert!(!fans.get("fan0").unwrap().is_locked());
    }
}
