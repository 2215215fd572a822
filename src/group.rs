//! Group (C3) — a named set of object paths sharing one interface and
//! property, the unit every trigger and action resolves against.

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// A named group of object paths, loaded from `groups.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub interface: String,
    pub property: String,
    pub members: Vec<String>,
    /// Optional service hint so the cache can resolve ownership without a
    /// broker round trip when a member's publishing service is known up
    /// front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Optional expected value; groups that set this are used by
    /// actions (e.g. `count_state_floor`) to count members matching it
    /// rather than folding the raw values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<PropertyValue>,
}

impl Group {
    pub fn new(name: impl Into<String>, interface: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            property: property.into(),
            members: Vec::new(),
            service: None,
            expected_value: None,
        }
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expected_value(mut self, value: PropertyValue) -> Self {
        self.expected_value = Some(value);
        self
    }

    /// Two groups are the same group if name, interface, and property all
    /// match. A shared name with a different interface/property is a
    /// distinct identity, not a redeclaration. Used to union member lists
    /// contributed by multiple JSON files.
    pub fn identity_key(&self) -> (&str, &str, &str) {
        (self.name.as_str(), self.interface.as_str(), self.property.as_str())
    }

    /// Merge another definition of "the same" group (per `identity_key`)
    /// into this one, unioning members without duplicating paths.
    pub fn merge(&mut self, other: &Group) {
        debug_assert_eq!(self.identity_key(), other.identity_key());
        for member in &other.members {
            if !self.members.contains(member) {
                self.members.push(member.clone());
            }
        }
        if self.service.is_none() {
            self.service = other.service.clone();
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.members.iter().any(|m| m == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_member_order() {
        let a = Group::new("g1", "xyz.Tach", "Value").with_members(["/fan0", "/fan1"]);
        let b = Group::new("g1", "xyz.Tach", "Value").with_members(["/fan1", "/fan0"]);
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn same_name_different_interface_is_a_distinct_identity() {
        let a = Group::new("g1", "xyz.Tach", "Value");
        let b = Group::new("g1", "xyz.Other", "Value");
        assert_ne!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn merge_unions_members_without_duplicates() {
        let mut a = Group::new("g1", "xyz.Tach", "Value").with_members(["/fan0"]);
        let b = Group::new("g1", "xyz.Tach", "Value").with_members(["/fan0", "/fan1"]);
        a.merge(&b);
        assert_eq!(a.members, vec!["/fan0".to_string(), "/fan1".to_string()]);
    }
}
