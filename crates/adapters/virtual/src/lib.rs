//! # nido-adapter-virtual
//!
//! Virtual protocol family: in-memory devices that acknowledge commands
//! instantly and report telemetry on demand. Used by the daemon for demo
//! fleets and by integration tests to exercise the full dispatch path
//! without hardware. Per-device failure behaviour can be scripted to
//! simulate flaky radios, rejecting firmware or dead bridges.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::broadcast;

use nido_core::ports::adapter::{AdapterError, DeviceAdapter, Telemetry};
use nido_domain::device::{AttributeValue, Capability, Device};
use nido_domain::id::DeviceId;
use nido_domain::time::now;

/// How a virtual device answers commands.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    /// Acknowledge instantly.
    #[default]
    Normal,
    /// Report a timeout on every command.
    AlwaysTimeout,
    /// Reject every command with the given reason.
    Reject(String),
    /// Report connectivity loss on every command.
    Disconnected,
}

struct VirtualDevice {
    descriptor: Device,
    behavior: Behavior,
}

/// In-memory device adapter.
pub struct VirtualAdapter {
    devices: DashMap<DeviceId, VirtualDevice>,
    telemetry: broadcast::Sender<Telemetry>,
    sent: Mutex<Vec<(DeviceId, HashMap<Capability, AttributeValue>)>>,
}

impl Default for VirtualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualAdapter {
    /// Create an adapter with no devices.
    #[must_use]
    pub fn new() -> Self {
        let (telemetry, _) = broadcast::channel(64);
        Self {
            devices: DashMap::new(),
            telemetry,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A small demo fleet: lights, a thermostat, a lock, a motion sensor
    /// and a home-mode holder.
    #[must_use]
    pub fn demo() -> Self {
        let adapter = Self::new();
        adapter.add_device(
            Device::builder("virtual-light-1")
                .name("Living room light")
                .capability(Capability::Power)
                .capability(Capability::Brightness)
                .capability(Capability::ColorTemp)
                .manufacturer("nido")
                .model("vlight"),
        );
        adapter.add_device(
            Device::builder("virtual-light-2")
                .name("Bedroom light")
                .capability(Capability::Power)
                .capability(Capability::Brightness)
                .manufacturer("nido")
                .model("vlight"),
        );
        adapter.add_device(
            Device::builder("virtual-thermostat-1")
                .name("Hallway thermostat")
                .capability(Capability::TargetTemp)
                .capability(Capability::Temperature)
                .manufacturer("nido")
                .model("vtherm"),
        );
        adapter.add_device(
            Device::builder("virtual-lock-1")
                .name("Front door lock")
                .capability(Capability::LockState)
                .battery(92)
                .manufacturer("nido")
                .model("vlock"),
        );
        adapter.add_device(
            Device::builder("virtual-motion-1")
                .name("Hallway motion sensor")
                .capability(Capability::Motion)
                .battery(77),
        );
        adapter.add_device(
            Device::builder("virtual-home-mode")
                .name("Home mode")
                .capability(Capability::Presence),
        );
        adapter
    }

    /// Add a device with normal behaviour.
    pub fn add_device(&self, device: nido_domain::device::DeviceBuilder) {
        self.add_device_with(device.build(), Behavior::Normal);
    }

    /// Add a device with scripted behaviour.
    pub fn add_device_with(&self, device: Device, behavior: Behavior) {
        self.devices.insert(
            device.id.clone(),
            VirtualDevice {
                descriptor: device,
                behavior,
            },
        );
    }

    /// Change a device's scripted behaviour. Returns `false` for unknown
    /// devices.
    pub fn set_behavior(&self, id: &DeviceId, behavior: Behavior) -> bool {
        match self.devices.get_mut(id) {
            Some(mut device) => {
                device.behavior = behavior;
                true
            }
            None => false,
        }
    }

    /// Emit a telemetry update for a device, stamped with the current
    /// time.
    pub fn push_telemetry(
        &self,
        device: impl Into<DeviceId>,
        changes: HashMap<Capability, AttributeValue>,
    ) {
        let device = device.into();
        let update = Telemetry {
            device: device.clone(),
            changes,
            timestamp: now(),
            battery: self
                .devices
                .get(&device)
                .and_then(|d| d.descriptor.battery),
            signal_strength: None,
        };
        if self.telemetry.send(update).is_err() {
            tracing::debug!(device = %device, "telemetry emitted with no subscribers");
        }
    }

    /// Commands acknowledged so far, in arrival order.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<(DeviceId, HashMap<Capability, AttributeValue>)> {
        self.sent.lock().expect("sent-commands poisoned").clone()
    }
}

impl DeviceAdapter for VirtualAdapter {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn discover(&self) -> impl Future<Output = Result<Vec<Device>, AdapterError>> + Send {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        async { Ok(devices) }
    }

    fn send_command(
        &self,
        device: &DeviceId,
        changes: &HashMap<Capability, AttributeValue>,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send {
        let result = match self.devices.get(device) {
            None => Err(AdapterError::Rejected(format!("unknown device {device}"))),
            Some(entry) => match &entry.behavior {
                Behavior::Normal => {
                    self.sent
                        .lock()
                        .expect("sent-commands poisoned")
                        .push((device.clone(), changes.clone()));
                    tracing::debug!(device = %device, "virtual device acknowledged command");
                    Ok(())
                }
                Behavior::AlwaysTimeout => Err(AdapterError::Timeout),
                Behavior::Reject(reason) => Err(AdapterError::Rejected(reason.clone())),
                Behavior::Disconnected => Err(AdapterError::ConnectivityLost),
            },
        };
        async { result }
    }

    fn subscribe_telemetry(&self) -> broadcast::Receiver<Telemetry> {
        self.telemetry.subscribe()
    }
}
