//! Property cache (C2) — the per-process snapshot of broker state that
//! groups, triggers, and actions read from instead of calling the
//! broker directly.
//!
//! Holds the same `path -> interface -> property -> value` shape as the
//! broker itself, plus an ownership table keyed by `(path, interface)`
//! so that a lost bus-name owner evicts every property that service
//! contributed, not just the ones most recently touched.

use std::collections::BTreeMap;

use crate::value::PropertyValue;

type PropertyMap = BTreeMap<String, PropertyValue>;
type InterfaceMap = BTreeMap<String, PropertyMap>;

#[derive(Debug, Clone)]
struct Owner {
    service: String,
    owned: bool,
}

/// In-memory mirror of broker-owned object state.
#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: BTreeMap<String, InterfaceMap>,
    // (path, interface) -> owning service + current owned flag
    owners: BTreeMap<(String, String), Owner>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache with a batch of objects discovered at startup via
    /// `GetManagedObjects`, recording `service` as the owner of every
    /// interface introduced.
    pub fn add_objects(
        &mut self,
        service: &str,
        objects: BTreeMap<String, BTreeMap<String, BTreeMap<String, PropertyValue>>>,
    ) {
        for (path, ifaces) in objects {
            for (interface, props) in ifaces {
                for (prop, value) in props {
                    self.set_property(&path, &interface, &prop, value);
                }
                self.owners.insert(
                    (path.clone(), interface.clone()),
                    Owner { service: service.to_string(), owned: true },
                );
            }
        }
    }

    /// Insert or update a single property. A NaN double is silently
    /// dropped per the cache's storage invariant: the previous
    /// value, if any, is left in place.
    pub fn set_property(&mut self, path: &str, interface: &str, property: &str, value: PropertyValue) {
        if value.is_nan_double() {
            return;
        }
        self.objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), value);
    }

    /// Drop every property published under `path`'s `interface`. Used
    /// both for `InterfacesRemoved` signals and ownership eviction.
    pub fn remove_interface(&mut self, path: &str, interface: &str) {
        if let Some(ifaces) = self.objects.get_mut(path) {
            ifaces.remove(interface);
            if ifaces.is_empty() {
                self.objects.remove(path);
            }
        }
        self.owners.remove(&(path.to_string(), interface.to_string()));
    }

    /// Record an explicit `(path, interface)` ownership, e.g. when a
    /// property is learned outside of `add_objects` (a lone
    /// `PropertiesChanged` signal from an as-yet-unseen service).
    pub fn record_owner(&mut self, path: &str, interface: &str, service: &str) {
        self.owners.insert(
            (path.to_string(), interface.to_string()),
            Owner { service: service.to_string(), owned: true },
        );
    }

    /// A bus-name owner changed. When it drops ownership (`owned ==
    /// false`), every `(path, interface)` pair it owns is fully evicted
    /// from the cache.
    pub fn set_owner(&mut self, service: &str, owned: bool) {
        let affected: Vec<(String, String)> = self
            .owners
            .iter()
            .filter(|(_, o)| o.service == service)
            .map(|(k, _)| k.clone())
            .collect();

        if owned {
            for key in &affected {
                if let Some(o) = self.owners.get_mut(key) {
                    o.owned = true;
                }
            }
            return;
        }

        for (path, interface) in affected {
            self.remove_interface(&path, &interface);
        }
    }

    /// Read a cached value, returning `None` on a miss (the caller
    /// decides whether a miss is fatal).
    pub fn get_value(&self, path: &str, interface: &str, property: &str) -> Option<&PropertyValue> {
        self.objects.get(path)?.get(interface)?.get(property)
    }

    /// All properties cached for `path`'s `interface`, if any.
    pub fn get_interface(&self, path: &str, interface: &str) -> Option<&PropertyMap> {
        self.objects.get(path)?.get(interface)
    }

    /// Every `(path, value)` pair of `property` across every cached
    /// object that carries `interface`. Used by `count_state_*` and
    /// `net_*` actions to fold over a group's members.
    pub fn values_for_property<'a>(
        &'a self,
        interface: &'a str,
        property: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a PropertyValue)> + 'a {
        self.objects.iter().filter_map(move |(path, ifaces)| {
            let value = ifaces.get(interface)?.get(property)?;
            Some((path.as_str(), value))
        })
    }

    pub fn is_owned(&self, path: &str, interface: &str) -> bool {
        self.owners
            .get(&(path.to_string(), interface.to_string()))
            .is_some_and(|o| o.owned)
    }

    pub fn owner_of(&self, path: &str, interface: &str) -> Option<&str> {
        self.owners
            .get(&(path.to_string(), interface.to_string()))
            .map(|o| o.service.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_objects() -> BTreeMap<String, BTreeMap<String, BTreeMap<String, PropertyValue>>> {
        let mut props = BTreeMap::new();
        props.insert("Value".to_string(), PropertyValue::Double(4000.0));
        let mut ifaces = BTreeMap::new();
        ifaces.insert("xyz.Tach".to_string(), props);
        let mut objs = BTreeMap::new();
        objs.insert("/fan0".to_string(), ifaces);
        objs
    }

    #[test]
    fn add_objects_then_get_value() {
        let mut cache = ObjectCache::new();
        cache.add_objects("svc", sample_objects());
        assert_eq!(
            cache.get_value("/fan0", "xyz.Tach", "Value"),
            Some(&PropertyValue::Double(4000.0))
        );
        assert!(cache.is_owned("/fan0", "xyz.Tach"));
    }

    #[test]
    fn nan_double_is_never_stored() {
        let mut cache = ObjectCache::new();
        cache.set_property("/fan0", "xyz.Tach", "Value", PropertyValue::Double(1.0));
        cache.set_property("/fan0", "xyz.Tach", "Value", PropertyValue::Double(f64::NAN));
        assert_eq!(
            cache.get_value("/fan0", "xyz.Tach", "Value"),
            Some(&PropertyValue::Double(1.0))
        );
    }

    #[test]
    fn owner_loss_evicts_its_interfaces() {
        let mut cache = ObjectCache::new();
        cache.add_objects("svc", sample_objects());
        cache.set_owner("svc", false);
        assert_eq!(cache.get_value("/fan0", "xyz.Tach", "Value"), None);
        assert!(!cache.is_owned("/fan0", "xyz.Tach"));
    }

    #[test]
    fn remove_interface_drops_empty_path() {
        let mut cache = ObjectCache::new();
        cache.add_objects("svc", sample_objects());
        cache.remove_interface("/fan0", "xyz.Tach");
        assert_eq!(cache.get_interface("/fan0", "xyz.Tach"), None);
    }

    #[test]
    fn values_for_property_folds_across_members() {
        let mut cache = ObjectCache::new();
        cache.set_property("/fan0", "xyz.Tach", "Value", PropertyValue::Double(1.0));
        cache.set_property("/fan1", "xyz.Tach", "Value", PropertyValue::Double(2.0));
        let mut sum = 0.0;
        for (_, v) in cache.values_for_property("xyz.Tach", "Value") {
            sum += v.as_f64().unwrap();
        }
        assert_eq!(sum, 3.0);
    }
}
