//! Device adapter port — the protocol-specific command/telemetry boundary.
//!
//! One implementing variant exists per protocol family (virtual, Zigbee,
//! cloud-API, …). Adapters translate protocol details and must report
//! connectivity loss as a distinct error kind, not a timeout. New
//! protocols add a variant; the core never changes.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::broadcast;

use nido_domain::device::{AttributeValue, Capability, Device};
use nido_domain::id::DeviceId;
use nido_domain::time::Timestamp;

/// A device-reported state update pushed by an adapter.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub device: DeviceId,
    pub changes: HashMap<Capability, AttributeValue>,
    /// When the device observed the change (not when it arrived).
    pub timestamp: Timestamp,
    pub battery: Option<u8>,
    pub signal_strength: Option<i32>,
}

/// Errors an adapter reports for a command.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// The device did not answer in time; retryable.
    #[error("device did not acknowledge in time")]
    Timeout,
    /// The connection to the device or its bridge is gone; retryable,
    /// and distinct from a timeout by contract.
    #[error("connectivity to the device was lost")]
    ConnectivityLost,
    /// The device reported the command as invalid; never retried.
    #[error("device rejected the command: {0}")]
    Rejected(String),
}

impl AdapterError {
    /// Whether the dispatcher may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectivityLost)
    }
}

/// A pluggable protocol adapter.
pub trait DeviceAdapter: Send + Sync {
    /// Unique name identifying this adapter family (e.g. `"virtual"`).
    fn name(&self) -> &'static str;

    /// Announce the devices this adapter currently knows about, for
    /// seeding the registry at startup.
    fn discover(&self) -> impl Future<Output = Result<Vec<Device>, AdapterError>> + Send;

    /// Send desired attribute changes to a device.
    fn send_command(
        &self,
        device: &DeviceId,
        changes: &HashMap<Capability, AttributeValue>,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send;

    /// Subscribe to the adapter's telemetry push feed.
    fn subscribe_telemetry(&self) -> broadcast::Receiver<Telemetry>;
}

impl<T: DeviceAdapter> DeviceAdapter for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn discover(&self) -> impl Future<Output = Result<Vec<Device>, AdapterError>> + Send {
        (**self).discover()
    }

    fn send_command(
        &self,
        device: &DeviceId,
        changes: &HashMap<Capability, AttributeValue>,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send {
        (**self).send_command(device, changes)
    }

    fn subscribe_telemetry(&self) -> broadcast::Receiver<Telemetry> {
        (**self).subscribe_telemetry()
    }
}
