//! Parameter store (C6) — a process-wide `key -> value` map that actions
//! read and write outside of the object cache, used to pass derived
//! values (e.g. `set_parameter_from_group`'s fold result) between
//! otherwise-unrelated triggers.

use std::collections::BTreeMap;

use crate::value::PropertyValue;

#[derive(Debug, Default)]
pub struct ParameterStore {
    values: BTreeMap<String, PropertyValue>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    /// Write `key`, returning whether the value actually changed so
    /// callers can decide whether to re-run dependent triggers: writes
    /// that don't change the value do not re-trigger.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) -> bool {
        let key = key.into();
        match self.values.get(&key) {
            Some(existing) if *existing == value => false,
            _ => {
                self.values.insert(key, value);
                true
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// A snapshot of the current value for `key`, used by parameter
    /// triggers to detect a real change across a write.
    pub fn snapshot(&self, key: &str) -> Option<PropertyValue> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_whether_value_changed() {
        let mut store = ParameterStore::new();
        assert!(store.set("floor_offset", PropertyValue::Int64(5)));
        assert!(!store.set("floor_offset", PropertyValue::Int64(5)));
        assert!(store.set("floor_offset", PropertyValue::Int64(6)));
    }

    #[test]
    fn equal_value_across_numeric_tags_does_not_retrigger() {
        let mut store = ParameterStore::new();
        store.set("n", PropertyValue::Int32(5));
        assert!(!store.set("n", PropertyValue::Double(5.0)));
    }
}
