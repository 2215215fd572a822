//! `missing_owner_target` / `default_floor_on_missing_owner`: gate a
//! target hold or floor default on whether the serving bus-name owns
//! its interface.

use crate::error::Result;

use super::{Action, ActionContext};

pub struct MissingOwnerTarget {
    ident: String,
    group: String,
    target: u64,
    held: bool,
}

impl MissingOwnerTarget {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, target: u64) -> Self {
        Self { ident: ident.into(), group: group.into(), target, held: false }
    }
}

impl Action for MissingOwnerTarget {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group) else { return Ok(()) };
        let any_missing = group
            .members
            .iter()
            .any(|path| !ctx.cache.is_owned(path, &group.interface));

        if any_missing != self.held {
            ctx.zone.set_target_hold(self.ident.clone(), self.target, any_missing, ctx.fans);
            self.held = any_missing;
        }
        Ok(())
    }
}

pub struct DefaultFloorOnMissingOwner {
    ident: String,
    group: String,
    floor: u64,
    held: bool,
}

impl DefaultFloorOnMissingOwner {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, floor: u64) -> Self {
        Self { ident: ident.into(), group: group.into(), floor, held: false }
    }
}

impl Action for DefaultFloorOnMissingOwner {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group) else { return Ok(()) };
        let any_missing = group
            .members
            .iter()
            .any(|path| !ctx.cache.is_owned(path, &group.interface));

        if any_missing != self.held {
            ctx.zone.set_floor_hold(self.ident.clone(), self.floor, any_missing, ctx.fans);
            self.held = any_missing;
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
    fn missing_owner_raises_target_hold() {
        let cache = ObjectCache::new();
        let mut groups = BTreeMap::new();
        groups.insert("fans".into(), Group::new("fans", "xyz.Tach", "Value").with_members(["/fan0"]));
        let mut params = ParameterStore::new();
        let mut zone = Zone::new("z1", 100, 10, 50);
        let mut fans = BTreeMap::new();
        let mut action = MissingOwnerTarget::new("m1", "fans", 100);
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.zone.target(), 100);
    }
}
