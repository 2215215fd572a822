//! `get_managed_objects`: force-refresh all referenced
//! group members via a managed-objects query, then run sub-actions
//! against the freshly populated cache.

use crate::broker::ObjectBroker;
use crate::cache::ObjectCache;
use crate::error::Result;
use crate::group::Group;

use super::{Action, ActionContext};

pub struct GetManagedObjects {
    ident: String,
    groups: Vec<String>,
    sub_actions: Vec<Box<dyn Action + Send>>,
}

impl GetManagedObjects {
    pub fn new(ident: impl Into<String>, groups: Vec<String>, sub_actions: Vec<Box<dyn Action + Send>>) -> Self {
        Self { ident: ident.into(), groups, sub_actions }
    }

    /// Refresh every referenced group's members from `broker`, then run
    /// the wrapped sub-actions against `ctx`. Split out from [`Action::run`]
    /// because refreshing needs a mutable broker while `ctx.cache` is an
    /// immutable borrow during sub-action execution.
    pub fn refresh_and_run(
        &mut self,
        broker: &dyn ObjectBroker,
        cache: &mut ObjectCache,
        group_defs: &std::collections::BTreeMap<String, Group>,
        ctx: &mut ActionContext<'_>,
    ) -> Result<()> {
        for group_name in &self.groups {
            let Some(group) = group_defs.get(group_name) else { continue };
            for member in &group.members {
                let Ok(service) = broker.resolve_service(member, &group.interface) else { continue };
                if let Ok(objects) = broker.get_managed_objects(&service, member) {
                    cache.add_objects(&service, objects);
                }
            }
        }
        for action in &mut self.sub_actions {
            action.run(ctx)?;
        }
        Ok(())
    }
}

impl Action for GetManagedObjects {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        for action in &mut self.sub_actions {
            action.run(ctx)?;
        }
        Ok(())
    }
}
