//! Trigger registry (C4) — the four event-binding classes that wire
//! cache mutations and timers to an event's bound actions.
//!
//! Each trigger is a small descriptor plus a `fire` condition; the
//! manager owns the actual subscription bookkeeping (signal dispatch,
//! timer scheduling) and calls into these to decide whether the bound
//! actions should run. Keeping triggers as data rather than closures
//! separates "what should happen" from "who drives the clock".

use std::time::Duration;

use crate::value::PropertyValue;

/// The broker signal classes a [`Trigger::Signal`] can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalClass {
    PropertiesChanged,
    InterfacesAdded,
    InterfacesRemoved,
    NameOwnerChanged,
    Member,
}

/// The priming method an [`Trigger::Init`] trigger uses before its
/// actions run for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMethod {
    GetProperties,
    NameHasOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Repeating,
}

/// A single trigger binding. `groups` names the [`crate::group::Group`]s
/// this trigger reacts to or primes; `actions` are the identifiers of
/// actions to invoke when it fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Runs exactly once after the owning event loads.
    Init { method: InitMethod, groups: Vec<String>, actions: Vec<String> },
    /// Subscribes to one or more signal classes for each group member.
    Signal { classes: Vec<SignalClass>, groups: Vec<String>, actions: Vec<String> },
    /// Fires on a one-shot or repeating schedule.
    Timer {
        kind: TimerKind,
        period: Duration,
        preload: bool,
        groups: Vec<String>,
        actions: Vec<String>,
    },
    /// Fires when `parameter` is written with a value different from
    /// its previous one (including erasure transitions).
    Parameter { parameter: String, actions: Vec<String> },
}

impl Trigger {
    pub fn actions(&self) -> &[String] {
        match self {
            Trigger::Init { actions, .. }
            | Trigger::Signal { actions, .. }
            | Trigger::Timer { actions, .. } => actions,
            Trigger::Parameter { actions, .. } => actions,
        }
    }

    pub fn groups(&self) -> &[String] {
        static EMPTY: [String; 0] = [];
        match self {
            Trigger::Init { groups, .. }
            | Trigger::Signal { groups, .. }
            | Trigger::Timer { groups, .. } => groups,
            Trigger::Parameter { .. } => &EMPTY,
        }
    }

    /// The match string signal triggers coalesce on: identical match
    /// strings merge their action lists into one subscription.
    pub fn signal_match_key(&self) -> Option<String> {
        match self {
            Trigger::Signal { classes, groups, .. } => {
                let mut classes: Vec<&'static str> = classes
                    .iter()
                    .map(|c| match c {
                        SignalClass::PropertiesChanged => "properties_changed",
                        SignalClass::InterfacesAdded => "interfaces_added",
                        SignalClass::InterfacesRemoved => "interfaces_removed",
                        SignalClass::NameOwnerChanged => "name_owner_changed",
                        SignalClass::Member => "member",
                    })
                    .collect();
                classes.sort_unstable();
                let mut groups = groups.clone();
                groups.sort();
                Some(format!("{}|{}", classes.join(","), groups.join(",")))
            }
            _ => None,
        }
    }

    /// Merge `other`'s action list into this trigger, used when two
    /// signal triggers share a match key.
    pub fn merge_actions(&mut self, other: &Trigger) {
        match self {
            Trigger::Signal { actions, .. } => {
                for action in other.actions() {
                    if !actions.contains(action) {
                        actions.push(action.clone());
                    }
                }
            }
            _ => debug_assert!(false, "merge_actions called on a non-signal trigger"),
        }
    }
}

/// The registry of parameter triggers, kept separate from the other
/// three classes because C6 drives them directly on every write rather
/// than through the signal/timer dispatch loop.
#[derive(Debug, Default)]
pub struct ParameterTriggerRegistry {
    by_parameter: std::collections::BTreeMap<String, Vec<String>>,
}

impl ParameterTriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parameter: impl Into<String>, action: impl Into<String>) {
        self.by_parameter
            .entry(parameter.into())
            .or_default()
            .push(action.into());
    }

    pub fn actions_for(&self, parameter: &str) -> &[String] {
        self.by_parameter
            .get(parameter)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Decide, given an old and new value, whether a parameter write should
/// re-fire its registered triggers: fires if and only if the stored
/// value changes.
pub fn parameter_write_changed(old: Option<&PropertyValue>, new: Option<&PropertyValue>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_signal_triggers_share_a_key() {
        let a = Trigger::Signal {
            classes: vec![SignalClass::PropertiesChanged],
            groups: vec!["fans".into()],
            actions: vec!["a1".into()],
        };
        let b = Trigger::Signal {
            classes: vec![SignalClass::PropertiesChanged],
            groups: vec!["fans".into()],
            actions: vec!["a2".into()],
        };
        assert_eq!(a.signal_match_key(), b.signal_match_key());
    }

    #[test]
    fn merge_actions_dedupes() {
        let mut a = Trigger::Signal {
            classes: vec![SignalClass::PropertiesChanged],
            groups: vec!["fans".into()],
            actions: vec!["a1".into()],
        };
        let b = Trigger::Signal {
            classes: vec![SignalClass::PropertiesChanged],
            groups: vec!["fans".into()],
            actions: vec!["a1".into(), "a2".into()],
        };
        a.merge_actions(&b);
        assert_eq!(a.actions(), &["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn parameter_erasure_is_a_change() {
        assert!(parameter_write_changed(Some(&PropertyValue::Int64(1)), None));
        assert!(parameter_write_changed(None, Some(&PropertyValue::Int64(1))));
        assert!(!parameter_write_changed(None, None));
    }
}
