//! Action library (C5) — every action is `run(&mut ActionContext)`,
//! pulling group values from the cache and arbitrating through the
//! bound zone.
//!
//! Submodules group actions by algorithm family rather than by config
//! file section — net-target actions, mapped-floor actions, and
//! parameter actions each live together regardless of which JSON file
//! a user would configure them from.

mod count_state;
mod gating;
mod managed_objects;
mod mapped_floor;
mod net_target;
mod override_target;
mod parameter_actions;
mod pcie_floors;
mod target_from_group_max;
mod timer_wrapped;

pub use count_state::{CountStateFloor, CountStateTarget};
pub use gating::{DefaultFloorOnMissingOwner, MissingOwnerTarget};
pub use managed_objects::GetManagedObjects;
pub use mapped_floor::{FanFloorEntry, FloorPoint, MappedFloor, SecondarySource};
pub use net_target::{NetTargetDecrease, NetTargetIncrease, StateSource};
pub use override_target::OverrideFanTarget;
pub use parameter_actions::{Modifier, SetParameterFromGroup, SetParameterFromGroupMax};
pub use pcie_floors::{CardFloor, PcieCardFloors, PcieCardMetadata};
pub use target_from_group_max::{SpeedPoint, TargetFromGroupMax};
pub use timer_wrapped::CallActionsBasedOnTimer;

use std::collections::BTreeMap;

use crate::cache::ObjectCache;
use crate::error::Result;
use crate::fan::Fan;
use crate::group::Group;
use crate::parameter_store::ParameterStore;
use crate::zone::Zone;

/// Everything an action needs to read state and arbitrate a target or
/// floor request, bundled per invocation so actions stay free functions
/// of their own persistent state (thresholds, hold identities) plus
/// this borrow of the live engine.
pub struct ActionContext<'a> {
    pub cache: &'a ObjectCache,
    pub groups: &'a BTreeMap<String, Group>,
    pub params: &'a mut ParameterStore,
    pub zone: &'a mut Zone,
    pub fans: &'a mut BTreeMap<String, Fan>,
}

impl<'a> ActionContext<'a> {
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }
}

/// Common action trait; `identity` is the stable key used for hold
/// tables (`Zone::set_target_hold`/`set_floor_hold`) so repeated calls
/// from the same configured action instance collapse onto one entry.
pub trait Action {
    fn identity(&self) -> &str;
    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()>;
}
