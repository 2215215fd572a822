//! `count_state_floor` / `count_state_target`: count group
//! members matching a configured state, apply or release a hold at a
//! threshold crossing. The floor variant supports an entry delay.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::value::PropertyValue;

use super::{Action, ActionContext};

fn count_matching(ctx: &ActionContext<'_>, group_name: &str, state: &PropertyValue) -> u64 {
    let Some(group) = ctx.group(group_name) else { return 0 };
    group
        .members
        .iter()
        .filter_map(|path| ctx.cache.get_value(path, &group.interface, &group.property))
        .filter(|v| *v == state)
        .count() as u64
}

pub struct CountStateTarget {
    ident: String,
    group: String,
    state: PropertyValue,
    threshold: u64,
    target: u64,
    held: bool,
}

impl CountStateTarget {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, state: PropertyValue, threshold: u64, target: u64) -> Self {
        Self { ident: ident.into(), group: group.into(), state, threshold, target, held: false }
    }
}

impl Action for CountStateTarget {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let count = count_matching(ctx, &self.group, &self.state);
        let should_hold = count >= self.threshold;
        if should_hold != self.held {
            ctx.zone.set_target_hold(self.ident.clone(), self.target, should_hold, ctx.fans);
            self.held = should_hold;
        }
        Ok(())
    }
}

/// Entry-delayed variant: crossing the threshold starts a one-shot
/// timer and only applies the hold on expiration; leaving the state
/// cancels the timer and drops the hold immediately.
pub struct CountStateFloor {
    ident: String,
    group: String,
    state: PropertyValue,
    threshold: u64,
    floor: u64,
    delay: Option<Duration>,
    pending_since: Option<Instant>,
    held: bool,
}

impl CountStateFloor {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, state: PropertyValue, threshold: u64, floor: u64) -> Self {
        Self {
            ident: ident.into(),
            group: group.into(),
            state,
            threshold,
            floor,
            delay: None,
            pending_since: None,
            held: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Drive the pending timer with an externally supplied clock
    /// reading (the manager owns the tokio timer; this stays
    /// clock-injectable for tests).
    fn apply(&mut self, ctx: &mut ActionContext<'_>, over_threshold: bool, now: Instant) {
        match (over_threshold, self.delay) {
            (false, _) => {
                self.pending_since = None;
                if self.held {
                    ctx.zone.set_floor_hold(self.ident.clone(), self.floor, false, ctx.fans);
                    self.held = false;
                }
            }
            (true, None) => {
                if !self.held {
                    ctx.zone.set_floor_hold(self.ident.clone(), self.floor, true, ctx.fans);
                    self.held = true;
                }
            }
            (true, Some(delay)) => {
                let started = *self.pending_since.get_or_insert(now);
                if !self.held && now.duration_since(started) >= delay {
                    ctx.zone.set_floor_hold(self.ident.clone(), self.floor, true, ctx.fans);
                    self.held = true;
                }
            }
        }
    }

    pub fn run_at(&mut self, ctx: &mut ActionContext<'_>, now: Instant) -> Result<()> {
        let count = count_matching(ctx, &self.group, &self.state);
        self.apply(ctx, count >= self.threshold, now);
        Ok(())
    }
}

impl Action for CountStateFloor {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        self.run_at(ctx, Instant::now())
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

    fn ctx_fixture() -> (ObjectCache, BTreeMap<String, Group>, ParameterStore, Zone, BTreeMap<String, Fan>) {
        let mut cache = ObjectCache::new();
        cache.set_property("/fan0", "xyz.Fault", "Value", PropertyValue::Bool(true));
        cache.set_property("/fan1", "xyz.Fault", "Value", PropertyValue::Bool(true));
        let mut groups = BTreeMap::new();
        groups.insert(
            "faulted".to_string(),
            Group::new("faulted", "xyz.Fault", "Value").with_members(["/fan0", "/fan1"]),
        );
        (cache, groups, ParameterStore::new(), Zone::new("z1", 100, 10, 50), BTreeMap::new())
    }

    #[test]
    fn threshold_crossing_holds_and_releases_target() {
        let (cache, groups, mut params, mut zone, mut fans) = ctx_fixture();
        let mut action = CountStateTarget::new("a1", "faulted", PropertyValue::Bool(true), 2, 90);
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run(&mut ctx).unwrap();
        assert!(!ctx.zone.is_active());
        assert_eq!(ctx.zone.target(), 90);
    }

    #[test]
    fn delayed_floor_waits_for_timer_then_drops_immediately_on_exit() {
        let (mut cache, groups, mut params, mut zone, mut fans) = ctx_fixture();
        let mut action = CountStateFloor::new("f1", "faulted", PropertyValue::Bool(true), 2, 70)
            .with_delay(Duration::from_millis(50));
        let start = Instant::now();
        {
            let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
            action.run_at(&mut ctx, start).unwrap();
            assert_eq!(ctx.zone.floor(), 10);
            action.run_at(&mut ctx, start + Duration::from_millis(60)).unwrap();
            assert_eq!(ctx.zone.floor(), 70);
        }
        cache.set_property("/fan0", "xyz.Fault", "Value", PropertyValue::Bool(false));
        let mut ctx = ActionContext { cache: &cache, groups: &groups, params: &mut params, zone: &mut zone, fans: &mut fans };
        action.run_at(&mut ctx, start + Duration::from_millis(70)).unwrap();
        assert_eq!(ctx.zone.floor(), 10);
    }
}
