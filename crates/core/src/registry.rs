//! Device registry — the single source of truth for device state.
//!
//! The registry owns the authoritative mapping from device id to
//! last-known state and capabilities. Writes are serialized per device
//! (independent devices update concurrently); reads are cheap clones so
//! rule evaluation works on a consistent snapshot instead of chasing live
//! state. Every accepted telemetry update and confirmed command effect is
//! republished as a `TelemetryChanged` event, closing the loop.

use std::collections::HashSet;

use dashmap::DashMap;

use nido_domain::device::{Capability, Connectivity, Device, DeviceSnapshot};
use nido_domain::error::NidoError;
use nido_domain::event::{EventPayload, EventSource};
use nido_domain::id::DeviceId;
use nido_domain::time::now;

use crate::ports::adapter::Telemetry;
use crate::ports::event_bus::EventPublisher;

/// Authoritative device-state map.
pub struct DeviceRegistry<P> {
    devices: DashMap<DeviceId, Device>,
    publisher: P,
}

impl<P: EventPublisher> DeviceRegistry<P> {
    /// Create an empty registry.
    pub fn new(publisher: P) -> Self {
        Self {
            devices: DashMap::new(),
            publisher,
        }
    }

    /// Create a registry seeded with persisted devices.
    pub fn restore(publisher: P, devices: Vec<Device>) -> Self {
        let registry = Self::new(publisher);
        for device in devices {
            registry.devices.insert(device.id.clone(), device);
        }
        registry
    }

    /// Register a discovered device, or refresh its descriptor.
    ///
    /// Re-registration keeps the stored attribute history and connectivity
    /// but refreshes the capability set and metadata the adapter reports.
    pub fn register(&self, device: Device) {
        match self.devices.get_mut(&device.id) {
            Some(mut existing) => {
                existing.name = device.name;
                existing.capabilities = device.capabilities;
                existing.manufacturer = device.manufacturer;
                existing.model = device.model;
                existing.firmware_version = device.firmware_version;
                existing.active = true;
            }
            None => {
                tracing::info!(device = %device.id, name = %device.name, "device registered");
                self.devices.insert(device.id.clone(), device);
            }
        }
    }

    /// Last-known state of a device.
    #[must_use]
    pub fn get_state(&self, id: &DeviceId) -> Option<Device> {
        self.devices.get(id).map(|entry| entry.clone())
    }

    /// Consistent copy of the whole registry, for rule evaluation.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.devices
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// All active devices advertising a capability.
    #[must_use]
    pub fn list_by_capability(&self, capability: Capability) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| entry.active && entry.supports(capability))
            .map(|entry| entry.clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Number of devices known to the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry holds no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Apply a telemetry update to a device.
    ///
    /// Per-capability last-writer-wins by timestamp: updates older than
    /// the stored value are ignored (idempotent under reordering). On any
    /// accepted change a `TelemetryChanged` event is published.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::DeviceNotFound`] for unknown devices.
    pub async fn apply_telemetry(&self, telemetry: Telemetry) -> Result<Device, NidoError> {
        let (updated, accepted) = {
            let mut entry = self.devices.get_mut(&telemetry.device).ok_or_else(|| {
                NidoError::DeviceNotFound {
                    device: telemetry.device.clone(),
                }
            })?;
            let accepted = entry.apply_telemetry(&telemetry.changes, telemetry.timestamp);
            if let Some(battery) = telemetry.battery {
                entry.battery = Some(battery);
            }
            if let Some(signal) = telemetry.signal_strength {
                entry.signal_strength = Some(signal);
            }
            (entry.clone(), accepted)
        };

        if !accepted.is_empty() {
            let changes = telemetry
                .changes
                .iter()
                .filter(|(capability, _)| accepted.contains(capability))
                .map(|(capability, value)| (*capability, value.clone()))
                .collect();
            self.publisher
                .publish(
                    EventPayload::TelemetryChanged {
                        device: telemetry.device.clone(),
                        changes,
                    },
                    EventSource::Device {
                        device: telemetry.device,
                    },
                )
                .await?;
        }
        Ok(updated)
    }

    /// Apply the effect of an acknowledged command and republish it as a
    /// state-changed event.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::DeviceNotFound`] for unknown devices.
    pub async fn confirm_command(
        &self,
        device: &DeviceId,
        changes: &std::collections::HashMap<Capability, nido_domain::device::AttributeValue>,
        timestamp: nido_domain::time::Timestamp,
    ) -> Result<Device, NidoError> {
        let updated = {
            let mut entry =
                self.devices
                    .get_mut(device)
                    .ok_or_else(|| NidoError::DeviceNotFound {
                        device: device.clone(),
                    })?;
            entry.apply_command_effect(changes, timestamp);
            entry.clone()
        };
        self.publisher
            .publish(
                EventPayload::TelemetryChanged {
                    device: device.clone(),
                    changes: changes.clone(),
                },
                EventSource::Device {
                    device: device.clone(),
                },
            )
            .await?;
        Ok(updated)
    }

    /// Set a device's connectivity status. Returns `false` for unknown
    /// devices.
    pub fn set_connectivity(&self, id: &DeviceId, connectivity: Connectivity) -> bool {
        match self.devices.get_mut(id) {
            Some(mut entry) => {
                if entry.connectivity != connectivity {
                    tracing::info!(device = %id, status = %connectivity, "connectivity changed");
                }
                entry.connectivity = connectivity;
                true
            }
            None => false,
        }
    }

    /// Soft-deactivate a device: it keeps its history but is skipped by
    /// evaluation and dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::DeviceNotFound`] for unknown devices.
    pub fn deactivate(&self, id: &DeviceId) -> Result<Device, NidoError> {
        let mut entry = self
            .devices
            .get_mut(id)
            .ok_or_else(|| NidoError::DeviceNotFound { device: id.clone() })?;
        entry.active = false;
        Ok(entry.clone())
    }

    /// Remove a device entirely.
    ///
    /// # Errors
    ///
    /// Refused with [`NidoError::DeviceInUse`] while any rule or scene
    /// still references the device (`referenced` is the caller-computed
    /// reference set); soft-deactivation is the alternative. Returns
    /// [`NidoError::DeviceNotFound`] for unknown devices.
    pub fn remove(
        &self,
        id: &DeviceId,
        referenced: &HashSet<DeviceId>,
    ) -> Result<Device, NidoError> {
        if referenced.contains(id) {
            return Err(NidoError::DeviceInUse { device: id.clone() });
        }
        self.devices
            .remove(id)
            .map(|(_, device)| device)
            .ok_or_else(|| NidoError::DeviceNotFound { device: id.clone() })
    }

    /// Mark a device unreachable after a command exhausted its retries.
    pub fn mark_unreachable(&self, id: &DeviceId) {
        if !self.set_connectivity(id, Connectivity::Unreachable) {
            tracing::warn!(device = %id, "cannot mark unknown device unreachable");
        }
    }
}

/// Build a telemetry update stamped with the current time.
#[must_use]
pub fn telemetry_now(
    device: impl Into<DeviceId>,
    changes: std::collections::HashMap<Capability, nido_domain::device::AttributeValue>,
) -> Telemetry {
    Telemetry {
        device: device.into(),
        changes,
        timestamp: now(),
        battery: None,
        signal_strength: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nido_domain::device::AttributeValue;
    use nido_domain::error::NidoError;
    use nido_domain::event::Event;
    use nido_domain::time::Timestamp;
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::Mutex;

    // ── Spy publisher ──────────────────────────────────────────────

    #[derive(Default)]
    struct SpyPublisher {
        events: Mutex<Vec<Event>>,
    }

    impl EventPublisher for SpyPublisher {
        fn publish(
            &self,
            payload: EventPayload,
            source: EventSource,
        ) -> impl Future<Output = Result<Event, NidoError>> + Send {
            let event = Event::new(payload, source, now());
            self.events.lock().unwrap().push(event.clone());
            async { Ok(event) }
        }
    }

    fn light(id: &str) -> Device {
        Device::builder(id)
            .name("Light")
            .capability(Capability::Power)
            .capability(Capability::Brightness)
            .build()
    }

    fn registry_with(devices: Vec<Device>) -> DeviceRegistry<std::sync::Arc<SpyPublisher>> {
        let registry = DeviceRegistry::new(std::sync::Arc::new(SpyPublisher::default()));
        for device in devices {
            registry.register(device);
        }
        registry
    }

    fn power_on() -> HashMap<Capability, AttributeValue> {
        HashMap::from([(Capability::Power, AttributeValue::Bool(true))])
    }

    #[tokio::test]
    async fn should_apply_telemetry_and_publish_event() {
        let registry = registry_with(vec![light("light-1")]);

        let updated = registry
            .apply_telemetry(telemetry_now("light-1", power_on()))
            .await
            .unwrap();

        assert_eq!(
            updated.attribute(Capability::Power),
            Some(&AttributeValue::Bool(true))
        );
        let events = registry.publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].payload,
            EventPayload::TelemetryChanged { device, .. } if device.as_str() == "light-1"
        ));
    }

    #[tokio::test]
    async fn should_reject_telemetry_for_unknown_device() {
        let registry = registry_with(vec![]);
        let result = registry
            .apply_telemetry(telemetry_now("ghost", power_on()))
            .await;
        assert!(matches!(result, Err(NidoError::DeviceNotFound { .. })));
    }

    #[tokio::test]
    async fn should_not_publish_when_all_changes_stale() {
        let registry = registry_with(vec![light("light-1")]);
        let newer: Timestamp = now();
        let older = newer - chrono::Duration::seconds(60);

        registry
            .apply_telemetry(Telemetry {
                device: DeviceId::from("light-1"),
                changes: power_on(),
                timestamp: newer,
                battery: None,
                signal_strength: None,
            })
            .await
            .unwrap();

        let state = registry
            .apply_telemetry(Telemetry {
                device: DeviceId::from("light-1"),
                changes: HashMap::from([(Capability::Power, AttributeValue::Bool(false))]),
                timestamp: older,
                battery: None,
                signal_strength: None,
            })
            .await
            .unwrap();

        // Stored state unchanged, only the first publish happened.
        assert_eq!(
            state.attribute(Capability::Power),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(registry.publisher.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_update_battery_and_signal_from_telemetry() {
        let registry = registry_with(vec![light("light-1")]);
        registry
            .apply_telemetry(Telemetry {
                device: DeviceId::from("light-1"),
                changes: power_on(),
                timestamp: now(),
                battery: Some(80),
                signal_strength: Some(-60),
            })
            .await
            .unwrap();
        let state = registry.get_state(&DeviceId::from("light-1")).unwrap();
        assert_eq!(state.battery, Some(80));
        assert_eq!(state.signal_strength, Some(-60));
    }

    #[tokio::test]
    async fn should_confirm_command_and_publish_state_change() {
        let registry = registry_with(vec![light("light-1")]);
        let updated = registry
            .confirm_command(&DeviceId::from("light-1"), &power_on(), now())
            .await
            .unwrap();
        assert_eq!(
            updated.attribute(Capability::Power),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(registry.publisher.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn should_list_active_devices_by_capability() {
        let registry = registry_with(vec![
            light("light-1"),
            light("light-2"),
            Device::builder("sensor-1")
                .capability(Capability::Temperature)
                .build(),
        ]);
        registry.deactivate(&DeviceId::from("light-2")).unwrap();

        let lights = registry.list_by_capability(Capability::Power);
        let ids: Vec<&str> = lights.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["light-1"]);
    }

    #[test]
    fn should_keep_attributes_when_reregistering() {
        let registry = registry_with(vec![light("light-1")]);
        {
            let mut entry = registry.devices.get_mut(&DeviceId::from("light-1")).unwrap();
            entry.apply_command_effect(&power_on(), now());
        }
        registry.register(light("light-1"));
        let state = registry.get_state(&DeviceId::from("light-1")).unwrap();
        assert_eq!(
            state.attribute(Capability::Power),
            Some(&AttributeValue::Bool(true))
        );
    }

    #[test]
    fn should_refuse_removal_while_referenced() {
        let registry = registry_with(vec![light("light-1")]);
        let referenced = HashSet::from([DeviceId::from("light-1")]);
        let result = registry.remove(&DeviceId::from("light-1"), &referenced);
        assert!(matches!(result, Err(NidoError::DeviceInUse { .. })));
        assert!(registry.get_state(&DeviceId::from("light-1")).is_some());
    }

    #[test]
    fn should_remove_unreferenced_device() {
        let registry = registry_with(vec![light("light-1")]);
        let removed = registry.remove(&DeviceId::from("light-1"), &HashSet::new());
        assert!(removed.is_ok());
        assert!(registry.get_state(&DeviceId::from("light-1")).is_none());
    }

    #[test]
    fn should_mark_device_unreachable() {
        let registry = registry_with(vec![light("light-1")]);
        registry.mark_unreachable(&DeviceId::from("light-1"));
        let state = registry.get_state(&DeviceId::from("light-1")).unwrap();
        assert_eq!(state.connectivity, Connectivity::Unreachable);
    }

    #[test]
    fn should_take_independent_snapshot() {
        let registry = registry_with(vec![light("light-1")]);
        let snapshot = registry.snapshot();
        registry.deactivate(&DeviceId::from("light-1")).unwrap();
        // The snapshot is unaffected by later writes.
        assert!(snapshot.get(&DeviceId::from("light-1")).unwrap().active);
    }
}
