//! Object-broker client (C1) — the hexagonal boundary between domain
//! logic and the underlying object broker (D-Bus in production).
//!
//! A narrow trait the domain calls through, with a fully in-memory mock
//! implementation that makes every trigger, action, and manager path
//! testable without a running bus. A production adapter (e.g. backed by
//! `zbus`) would implement [`ObjectBroker`] but is outside this crate's
//! scope — the object broker is a named external collaborator.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::error::{BrokerError, Result};
use crate::value::PropertyValue;

/// Three signal classes the broker can deliver.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A property changed at `path` on `interface`.
    PropertiesChanged {
        path: String,
        interface: String,
        properties: BTreeMap<String, PropertyValue>,
    },
    /// New interfaces were added under `path_prefix`.
    InterfacesAdded {
        path: String,
        interfaces: BTreeMap<String, BTreeMap<String, PropertyValue>>,
    },
    /// Interfaces were removed from `path`.
    InterfacesRemoved { path: String, interfaces: Vec<String> },
    /// `service` gained or lost its bus-name owner.
    NameOwnerChanged { service: String, owned: bool },
    /// An arbitrary named D-Bus signal ("member" trigger class).
    Member { path: String, interface: String, name: String },
}

/// Capabilities consumed from the object broker.
///
/// All calls are synchronous within one event-loop iteration: a property
/// write followed by a read by the same process observes the write, even
/// before the broker echoes the signal back.
pub trait ObjectBroker {
    /// Read a single property with its tagged-union value.
    fn get_property(&self, path: &str, interface: &str, property: &str) -> Result<PropertyValue>;

    /// Write a single property.
    fn set_property(
        &mut self,
        path: &str,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<()>;

    /// Call an arbitrary method; arguments and return values are both
    /// modeled as ordered property-value lists for simplicity.
    fn call_method(
        &mut self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>>;

    /// Resolve the service (bus name) that owns `path`'s `interface`, by
    /// subtree lookup on an ObjectManager ancestor, falling back to a
    /// single property read.
    fn resolve_service(&self, path: &str, interface: &str) -> Result<String>;

    /// Whether `service` currently has a bus-name owner.
    fn name_has_owner(&self, service: &str) -> bool;

    /// All managed objects (path → interface → property → value) served
    /// by `service`'s nearest ObjectManager ancestor of `path`.
    fn get_managed_objects(
        &self,
        service: &str,
        path: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, BTreeMap<String, PropertyValue>>>>;
}

/// In-memory broker used by tests and by the domain's self-contained
/// examples. Services "publish" objects into it and tests drive signal
/// delivery by calling `push_event` on a paired dispatch loop.
#[derive(Default)]
pub struct MockBroker {
    // path -> interface -> property -> value
    objects: HashMap<String, HashMap<String, HashMap<String, PropertyValue>>>,
    // path -> interface -> owning service
    owners: HashMap<String, HashMap<String, String>>,
    // service -> owned
    name_owners: HashMap<String, bool>,
    events: VecDeque<BrokerEvent>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a property value under `service`'s ownership.
    pub fn publish(&mut self, service: &str, path: &str, interface: &str, property: &str, value: PropertyValue) {
        self.objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), value);
        self.owners
            .entry(path.to_string())
            .or_default()
            .insert(interface.to_string(), service.to_string());
        self.name_owners.entry(service.to_string()).or_insert(true);
    }

    pub fn set_name_owned(&mut self, service: &str, owned: bool) {
        self.name_owners.insert(service.to_string(), owned);
    }

    /// Queue a signal for later delivery. A paired dispatch loop drains
    /// these with [`MockBroker::drain_events`] once per iteration,
    /// matching how the production broker delivers signals out of band
    /// from the property reads/writes above.
    pub fn push_event(&mut self, event: BrokerEvent) {
        self.events.push_back(event);
    }

    /// Remove and return every event queued since the last drain, in
    /// arrival order.
    pub fn drain_events(&mut self) -> Vec<BrokerEvent> {
        self.events.drain(..).collect()
    }
}

impl ObjectBroker for MockBroker {
    fn get_property(&self, path: &str, interface: &str, property: &str) -> Result<PropertyValue> {
        self.objects
            .get(path)
            .and_then(|ifaces| ifaces.get(interface))
            .and_then(|props| props.get(property))
            .cloned()
            .ok_or_else(|| {
                crate::error::Error::NotCached {
                    path: path.to_string(),
                    interface: interface.to_string(),
                    property: property.to_string(),
                }
            })
    }

    fn set_property(
        &mut self,
        path: &str,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.objects
            .entry(path.to_string())
            .or_default()
            .entry(interface.to_string())
            .or_default()
            .insert(property.to_string(), value);
        Ok(())
    }

    fn call_method(
        &mut self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        _args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>> {
        if !self.name_has_owner(service) {
            return Err(crate::error::Error::Broker(BrokerError {
                service: service.to_string(),
                path: path.to_string(),
                interface: interface.to_string(),
                message: format!("no owner for method call {method}"),
            }));
        }
        Ok(Vec::new())
    }

    fn resolve_service(&self, path: &str, interface: &str) -> Result<String> {
        self.owners
            .get(path)
            .and_then(|ifaces| ifaces.get(interface))
            .cloned()
            .ok_or_else(|| {
                crate::error::Error::NotCached {
                    path: path.to_string(),
                    interface: interface.to_string(),
                    property: String::new(),
                }
            })
    }

    fn name_has_owner(&self, service: &str) -> bool {
        self.name_owners.get(service).copied().unwrap_or(false)
    }

    fn get_managed_objects(
        &self,
        service: &str,
        _path: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, BTreeMap<String, PropertyValue>>>> {
        let mut out: BTreeMap<String, BTreeMap<String, BTreeMap<String, PropertyValue>>> = BTreeMap::new();
        for (path, ifaces) in &self.objects {
            for (iface, owner) in self.owners.get(path).into_iter().flatten() {
                if owner != service {
                    continue;
                }
                if let Some(props) = ifaces.get(iface) {
                    out.entry(path.clone())
                        .or_default()
                        .insert(iface.clone(), props.clone().into_iter().collect());
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_read_roundtrip() {
        let mut b = MockBroker::new();
        b.publish("svc", "/fan0", "Tach", "Value", PropertyValue::Double(4000.0));
        assert_eq!(
            b.get_property("/fan0", "Tach", "Value").unwrap(),
            PropertyValue::Double(4000.0)
        );
    }

    #[test]
    fn unowned_service_fails_method_call() {
        let mut b = MockBroker::new();
        b.publish("svc", "/fan0", "Tach", "Value", PropertyValue::Double(1.0));
        b.set_name_owned("svc", false);
        assert!(b.call_method("svc", "/fan0", "Tach", "SetTarget", &[]).is_err());
    }

    #[test]
    fn drain_events_returns_in_arrival_order_and_empties_queue() {
        let mut b = MockBroker::new();
        b.push_event(BrokerEvent::NameOwnerChanged { service: "svc".into(), owned: true });
        b.push_event(BrokerEvent::Member { path: "/fan0".into(), interface: "xyz.Tach".into(), name: "Changed".into() });
        let drained = b.drain_events();
        assert_eq!(drained.len(), 2);
        assert!(b.drain_events().is_empty());
    }
}
