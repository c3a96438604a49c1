//! State stores — restart-surviving positions and device snapshots.

use std::collections::HashMap;
use std::future::Future;

use nido_domain::device::Device;
use nido_domain::error::NidoError;

/// Durable per-subscriber event-bus cursors.
///
/// Keys are [`EventSource::key`](nido_domain::event::EventSource::key)
/// strings; values are the last acknowledged sequence number. A restarted
/// subscriber resumes above its cursor.
pub trait CursorStore: Send + Sync {
    /// Load all cursors for a subscriber. Unknown subscribers get an
    /// empty map.
    fn load(
        &self,
        subscriber: &str,
    ) -> impl Future<Output = Result<HashMap<String, u64>, NidoError>> + Send;

    /// Persist one cursor for a subscriber.
    fn store(
        &self,
        subscriber: &str,
        source: &str,
        sequence: u64,
    ) -> impl Future<Output = Result<(), NidoError>> + Send;
}

impl<T: CursorStore> CursorStore for std::sync::Arc<T> {
    fn load(
        &self,
        subscriber: &str,
    ) -> impl Future<Output = Result<HashMap<String, u64>, NidoError>> + Send {
        (**self).load(subscriber)
    }

    fn store(
        &self,
        subscriber: &str,
        source: &str,
        sequence: u64,
    ) -> impl Future<Output = Result<(), NidoError>> + Send {
        (**self).store(subscriber, source, sequence)
    }
}

/// Durable last-known device state, reloaded into the registry at startup.
pub trait DeviceStateStore: Send + Sync {
    /// Load all persisted devices.
    fn load_all(&self) -> impl Future<Output = Result<Vec<Device>, NidoError>> + Send;

    /// Persist the full device set.
    fn save_all(&self, devices: &[Device]) -> impl Future<Output = Result<(), NidoError>> + Send;
}

impl<T: DeviceStateStore> DeviceStateStore for std::sync::Arc<T> {
    fn load_all(&self) -> impl Future<Output = Result<Vec<Device>, NidoError>> + Send {
        (**self).load_all()
    }

    fn save_all(&self, devices: &[Device]) -> impl Future<Output = Result<(), NidoError>> + Send {
        (**self).save_all(devices)
    }
}
