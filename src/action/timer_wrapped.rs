//! `call_actions_based_on_timer`: wraps a list of
//! sub-actions behind a per-event timer whose start/stop condition is
//! either "any member unowned" or "every member equals its group's
//! expected value".

use crate::error::Result;

use super::{Action, ActionContext};

pub struct CallActionsBasedOnTimer {
    ident: String,
    watch_group: String,
    sub_actions: Vec<Box<dyn Action + Send>>,
    running: bool,
}

impl CallActionsBasedOnTimer {
    pub fn new(ident: impl Into<String>, watch_group: impl Into<String>, sub_actions: Vec<Box<dyn Action + Send>>) -> Self {
        Self { ident: ident.into(), watch_group: watch_group.into(), sub_actions, running: false }
    }

    /// Whether the timer's start/stop condition currently holds, per the
    /// group's configured gating mode.
    fn condition(&self, ctx: &ActionContext<'_>) -> bool {
        let Some(group) = ctx.group(&self.watch_group) else { return false };
        match &group.expected_value {
            None => group.members.iter().any(|p| !ctx.cache.is_owned(p, &group.interface)),
            Some(expected) => group
                .members
                .iter()
                .filter_map(|p| ctx.cache.get_value(p, &group.interface, &group.property))
                .all(|v| v == expected),
        }
    }

    /// Called by the manager's timer dispatch when this action's bound
    /// timer fires; runs every sub-action in order.
    pub fn on_timer_fired(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        for action in &mut self.sub_actions {
            action.run(ctx)?;
        }
        Ok(())
    }

    pub fn should_be_running(&self) -> bool {
        self.running
    }
}

impl Action for CallActionsBasedOnTimer {
    fn identity(&self) -> &str {
        &self.ident
    }

    /// Evaluate the start/stop condition; the manager owns the actual
    /// timer and calls `on_timer_fired` on expiration.
    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        self.running = self.condition(ctx);
        Ok(())
    }
}
