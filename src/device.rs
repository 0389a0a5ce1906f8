//! Paired device bindings.
//!
//! Bindings belong to the external device layer: it creates and removes them
//! on pairing. The hub only reads them, forwards value/update events to them
//! and marks them unavailable when their sensor goes quiet. A binding's
//! existence never creates or deletes a sensor record.

use crate::error::DeviceError;
use crate::events::{HubEvent, Subscriber};
use crate::sensor::{CompositeId, FieldValue};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Interface of a device object owned by the device layer.
///
/// Implementations must not block: anything slow is handed off by the
/// implementation itself.
pub trait DeviceBinding: Send + Sync {
    fn name(&self) -> String;

    fn available(&self) -> bool;

    fn set_unavailable(&self, reason: &str) -> Result<(), DeviceError>;

    /// Time of the last data the device recorded (its `update` setting).
    fn last_setting_update(&self) -> Option<DateTime<Utc>>;

    fn on_value(&self, _capability: &str, _value: &FieldValue) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_update(&self, _timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct PairedState {
    available: bool,
    unavailable_reason: Option<String>,
    last_update: DateTime<Utc>,
    values: BTreeMap<String, FieldValue>,
}

/// In-memory device binding.
///
/// Keeps the latest capability values, records every update as its `update`
/// setting and becomes available again when data arrives.
#[derive(Debug)]
pub struct PairedDevice {
    name: String,
    state: Mutex<PairedState>,
}

impl PairedDevice {
    pub fn new(name: impl Into<String>, paired_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PairedState {
                available: true,
                unavailable_reason: None,
                last_update: paired_at,
                values: BTreeMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PairedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn value(&self, capability: &str) -> Option<FieldValue> {
        self.state().values.get(capability).cloned()
    }

    pub fn unavailable_reason(&self) -> Option<String> {
        self.state().unavailable_reason.clone()
    }
}

impl DeviceBinding for PairedDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn available(&self) -> bool {
        self.state().available
    }

    fn set_unavailable(&self, reason: &str) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.available = false;
        state.unavailable_reason = Some(reason.to_string());
        Ok(())
    }

    fn last_setting_update(&self) -> Option<DateTime<Utc>> {
        Some(self.state().last_update)
    }

    fn on_value(&self, capability: &str, value: &FieldValue) -> anyhow::Result<()> {
        self.state()
            .values
            .insert(capability.to_string(), value.clone());
        Ok(())
    }

    fn on_update(&self, timestamp: DateTime<Utc>) -> anyhow::Result<()> {
        let mut state = self.state();
        state.last_update = timestamp;
        if !state.available {
            tracing::info!("{} is receiving data again", self.name);
            state.available = true;
            state.unavailable_reason = None;
        }
        Ok(())
    }
}

/// Routes `value:<id>` and `update:<id>` events to a binding.
pub struct BindingSubscriber(pub Arc<dyn DeviceBinding>);

impl Subscriber for BindingSubscriber {
    fn on_event(&mut self, event: &HubEvent) -> anyhow::Result<()> {
        match event {
            HubEvent::ValueChanged {
                capability, value, ..
            } => self.0.on_value(capability, value),
            HubEvent::Updated { timestamp, .. } => self.0.on_update(*timestamp),
            _ => Ok(()),
        }
    }
}

/// Bindings currently known to the hub, keyed by sensor id.
#[derive(Default)]
pub struct DeviceBindingRegistry {
    bindings: HashMap<CompositeId, Arc<dyn DeviceBinding>>,
}

impl DeviceBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        id: CompositeId,
        binding: Arc<dyn DeviceBinding>,
    ) -> Option<Arc<dyn DeviceBinding>> {
        self.bindings.insert(id, binding)
    }

    pub fn remove(&mut self, id: &CompositeId) -> Option<Arc<dyn DeviceBinding>> {
        self.bindings.remove(id)
    }

    pub fn get(&self, id: &CompositeId) -> Option<&Arc<dyn DeviceBinding>> {
        self.bindings.get(id)
    }

    pub fn contains(&self, id: &CompositeId) -> bool {
        self.bindings.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompositeId, &Arc<dyn DeviceBinding>)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for DeviceBindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBindingRegistry")
            .field("ids", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paired_device_tracks_values_and_availability() {
        let t0 = Utc::now();
        let device = Arc::new(PairedDevice::new("Garden", t0));
        let mut sub = BindingSubscriber(device.clone());
        let id = CompositeId::new("P1", "42", 1);

        sub.on_event(&HubEvent::ValueChanged {
            id: id.clone(),
            capability: "measure_temperature".into(),
            value: FieldValue::Number(22.0),
        })
        .unwrap();
        assert_eq!(
            device.value("measure_temperature"),
            Some(FieldValue::Number(22.0))
        );

        device.set_unavailable("No data").unwrap();
        assert!(!device.available());
        assert_eq!(device.unavailable_reason().as_deref(), Some("No data"));

        let t1 = t0 + chrono::Duration::seconds(5);
        sub.on_event(&HubEvent::Updated { id, timestamp: t1 }).unwrap();
        assert!(device.available());
        assert_eq!(device.last_setting_update(), Some(t1));
    }

    #[test]
    fn test_registry_basics() {
        let mut registry = DeviceBindingRegistry::new();
        let id = CompositeId::new("P1", "1", 0);
        assert!(registry.is_empty());

        registry.insert(id.clone(), Arc::new(PairedDevice::new("A", Utc::now())));
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).map(|b| b.name()), Some("A".to_string()));

        assert!(registry.remove(&id).is_some());
        assert_eq!(registry.len(), 0);
    }
}
